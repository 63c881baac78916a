//! Consultation chat event types for the Telecare real-time channel.
//!
//! Every frame on the channel is a JSON object of the form
//! `{"event": <name>, "data": <payload>}`. Clients send [`ClientEvent`]s and
//! the relay answers with [`ServerEvent`]s, fanned out to the members of the
//! addressed room.

use serde::{Deserialize, Serialize};

/// Static notification text broadcast when a participant joins a room.
pub const USER_JOINED_TEXT: &str = "A user has joined the consultation";

/// Static notification text broadcast when a participant leaves a room.
pub const USER_LEFT_TEXT: &str = "A user has left the consultation";

/// Events sent by a connected client to the relay.
///
/// All fields are required. A frame missing any of them, or carrying a value
/// of the wrong type, fails to decode instead of being defaulted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Add the calling connection to a consultation room.
    JoinConsultation {
        /// Consultation room key.
        room: String,
    },

    /// Broadcast a chat message to every member of a room, sender included.
    SendMessage {
        /// Consultation room key.
        room: String,
        /// Free-text chat message. May be empty.
        message: String,
        /// Client-supplied display name. Not verified.
        sender: String,
    },

    /// Remove the calling connection from a consultation room.
    LeaveConsultation {
        /// Consultation room key.
        room: String,
    },
}

impl ClientEvent {
    /// Returns the room key this event addresses.
    #[must_use]
    pub fn room(&self) -> &str {
        match self {
            Self::JoinConsultation { room }
            | Self::SendMessage { room, .. }
            | Self::LeaveConsultation { room } => room,
        }
    }

    /// Returns the wire name of this event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::JoinConsultation { .. } => "join_consultation",
            Self::SendMessage { .. } => "send_message",
            Self::LeaveConsultation { .. } => "leave_consultation",
        }
    }
}

/// Events sent by the relay to connected clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Another participant joined a room this connection is a member of.
    UserJoined {
        /// Always [`USER_JOINED_TEXT`].
        message: String,
    },

    /// A chat message broadcast to a room.
    ReceiveMessage {
        /// The chat message text as sent.
        message: String,
        /// Display name supplied by the sending client.
        sender: String,
        /// Server-assigned local time, `HH:MM` (24-hour).
        timestamp: String,
    },

    /// A participant left a room this connection is a member of.
    UserLeft {
        /// Always [`USER_LEFT_TEXT`].
        message: String,
    },

    /// The relay rejected an event sent by this connection.
    Error {
        /// Human-readable rejection reason.
        reason: String,
    },
}

impl ServerEvent {
    /// Builds the `user_joined` notification.
    #[must_use]
    pub fn user_joined() -> Self {
        Self::UserJoined {
            message: USER_JOINED_TEXT.to_string(),
        }
    }

    /// Builds the `user_left` notification.
    #[must_use]
    pub fn user_left() -> Self {
        Self::UserLeft {
            message: USER_LEFT_TEXT.to_string(),
        }
    }

    /// Builds a `receive_message` broadcast stamped with the given time.
    #[must_use]
    pub fn receive_message(message: &str, sender: &str, timestamp: String) -> Self {
        Self::ReceiveMessage {
            message: message.to_string(),
            sender: sender.to_string(),
            timestamp,
        }
    }

    /// Builds an `error` reply.
    #[must_use]
    pub fn error(reason: impl Into<String>) -> Self {
        Self::Error {
            reason: reason.into(),
        }
    }
}
