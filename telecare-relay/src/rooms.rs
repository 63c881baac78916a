//! Room membership registry for the relay server.
//!
//! Maps each consultation room key to the set of connections currently
//! joined to it. A room exists only while it has at least one member: the
//! entry is created on first join and removed when the last member leaves.
//!
//! Room entries are ephemeral — lost on relay restart, same as the
//! connection registry.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use crate::connection::ConnectionId;

/// Result of adding a connection to a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    /// `false` if the connection was already a member.
    pub newly_joined: bool,
    /// Members of the room other than the joining connection.
    pub others: Vec<ConnectionId>,
}

/// Result of removing a connection from a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveOutcome {
    /// `false` if the connection was not a member.
    pub was_member: bool,
    /// Members still in the room after the removal.
    pub remaining: Vec<ConnectionId>,
}

/// In-memory map of room key to member connections.
///
/// Thread-safe via [`RwLock`]. Every mutation and the member snapshot it
/// returns happen under one write lock, so racing joins and leaves never
/// lose updates.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, HashSet<ConnectionId>>>,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomRegistry {
    /// Creates a new, empty room registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Adds `connection` to `room`, creating the room if needed.
    ///
    /// Joining a room twice keeps a single membership entry.
    pub fn join(&self, room: &str, connection: ConnectionId) -> JoinOutcome {
        let mut rooms = self.rooms.write();
        let members = rooms.entry(room.to_string()).or_default();
        let newly_joined = members.insert(connection);
        let others = members
            .iter()
            .copied()
            .filter(|member| *member != connection)
            .collect();
        drop(rooms);

        JoinOutcome {
            newly_joined,
            others,
        }
    }

    /// Removes `connection` from `room`, dropping the room once empty.
    pub fn leave(&self, room: &str, connection: ConnectionId) -> LeaveOutcome {
        let mut rooms = self.rooms.write();
        let Some(members) = rooms.get_mut(room) else {
            return LeaveOutcome {
                was_member: false,
                remaining: Vec::new(),
            };
        };

        let was_member = members.remove(&connection);
        let remaining: Vec<ConnectionId> = members.iter().copied().collect();
        if remaining.is_empty() {
            rooms.remove(room);
        }
        drop(rooms);

        LeaveOutcome {
            was_member,
            remaining,
        }
    }

    /// Removes `connection` from every room it belongs to.
    ///
    /// Returns each room that was left together with its remaining members.
    /// Rooms left empty are dropped.
    pub fn leave_all(&self, connection: ConnectionId) -> Vec<(String, Vec<ConnectionId>)> {
        let mut rooms = self.rooms.write();
        let mut left = Vec::new();

        rooms.retain(|room, members| {
            if members.remove(&connection) {
                left.push((room.clone(), members.iter().copied().collect()));
            }
            !members.is_empty()
        });
        drop(rooms);

        left
    }

    /// Returns the current members of `room` (empty for unknown rooms).
    pub fn members(&self, room: &str) -> Vec<ConnectionId> {
        let rooms = self.rooms.read();
        rooms
            .get(room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Returns `true` if `connection` is currently a member of `room`.
    pub fn is_member(&self, room: &str, connection: ConnectionId) -> bool {
        let rooms = self.rooms.read();
        rooms
            .get(room)
            .is_some_and(|members| members.contains(&connection))
    }

    /// Returns the keys of every room `connection` belongs to.
    pub fn rooms_of(&self, connection: ConnectionId) -> Vec<String> {
        let rooms = self.rooms.read();
        rooms
            .iter()
            .filter(|(_, members)| members.contains(&connection))
            .map(|(room, _)| room.clone())
            .collect()
    }

    /// Returns the number of rooms with at least one member.
    pub fn room_count(&self) -> usize {
        self.rooms.read().len()
    }
}
