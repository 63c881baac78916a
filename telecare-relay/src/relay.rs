//! Relay server core: shared state, WebSocket handler, connection registry,
//! and room fan-out.
//!
//! The relay accepts WebSocket connections, assigns each a [`ConnectionId`],
//! and routes consultation events between connections grouped by room key.
//! Nothing is persisted: events are delivered to whoever is in the room at
//! the moment they arrive, and dropped otherwise.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use telecare_proto::clock;
use telecare_proto::codec::{self, CodecError};
use telecare_proto::consultation::{ClientEvent, ServerEvent};
use tokio::sync::mpsc;

use crate::connection::ConnectionId;
use crate::rooms::RoomRegistry;

/// Default maximum allowed inbound frame size in bytes (16 KB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 16 * 1024;

/// Errors raised while handling a single connection.
///
/// Neither variant is fatal to the relay: each is confined to the
/// connection that caused it.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The inbound frame was malformed, oversized, or not a text frame.
    /// Reported back to the originating connection only.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The connection's outbound channel is closed.
    #[error("connection {0} lost")]
    ConnectionLost(ConnectionId),
}

impl From<CodecError> for RelayError {
    fn from(e: CodecError) -> Self {
        Self::InvalidPayload(e.to_string())
    }
}

/// Shared relay state holding the connection registry and room membership.
pub struct RelayState {
    /// Maps each live connection to the sender feeding its WebSocket writer.
    connections: RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<ServerEvent>>>,
    /// Room key to member connections.
    pub rooms: RoomRegistry,
    /// Maximum allowed inbound frame size in bytes.
    max_payload_size: usize,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates a new relay state with no connections or rooms and the
    /// default payload size limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Creates a new relay state with a custom payload size limit.
    #[must_use]
    pub fn with_config(max_payload_size: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            rooms: RoomRegistry::new(),
            max_payload_size,
        }
    }

    /// Registers a connection, storing the sender half of its event channel.
    pub fn register(
        &self,
        connection: ConnectionId,
        sender: mpsc::UnboundedSender<ServerEvent>,
    ) -> Option<mpsc::UnboundedSender<ServerEvent>> {
        self.connections.write().insert(connection, sender)
    }

    /// Removes a connection from the registry, returning its sender if it
    /// existed.
    ///
    /// Dropping the returned sender closes the channel, which ends the
    /// connection's writer task.
    pub fn unregister(
        &self,
        connection: ConnectionId,
    ) -> Option<mpsc::UnboundedSender<ServerEvent>> {
        self.connections.write().remove(&connection)
    }

    /// Returns a clone of the sender for the given connection, if registered.
    pub fn get_sender(
        &self,
        connection: ConnectionId,
    ) -> Option<mpsc::UnboundedSender<ServerEvent>> {
        self.connections.read().get(&connection).cloned()
    }

    /// Returns the number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Drops every registered connection.
    ///
    /// Each writer task sees its channel close, sends a Close frame and
    /// exits, which in turn tears down the reader and runs the disconnect
    /// cleanup.
    pub fn close_all_connections(&self) {
        let drained: Vec<ConnectionId> = self
            .connections
            .write()
            .drain()
            .map(|(id, _)| id)
            .collect();
        for connection in drained {
            tracing::info!(connection_id = %connection, "closing connection");
        }
    }

    /// Decodes one inbound text frame and applies it.
    ///
    /// Returns the number of connections the resulting broadcast reached.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidPayload`] if the frame exceeds the size
    /// limit or does not decode into a valid [`ClientEvent`].
    pub fn handle_text(&self, connection: ConnectionId, text: &str) -> Result<usize, RelayError> {
        if text.len() > self.max_payload_size {
            return Err(RelayError::InvalidPayload(format!(
                "payload too large: {} bytes (max {})",
                text.len(),
                self.max_payload_size
            )));
        }

        let event = codec::decode_client(text)?;
        tracing::debug!(
            connection_id = %connection,
            event = event.name(),
            room = %event.room(),
            "handling event"
        );
        Ok(self.dispatch(connection, &event))
    }

    /// Applies a decoded client event on behalf of `connection`.
    pub fn dispatch(&self, connection: ConnectionId, event: &ClientEvent) -> usize {
        match event {
            ClientEvent::JoinConsultation { room } => self.join(connection, room),
            ClientEvent::SendMessage {
                room,
                message,
                sender,
            } => self.send_message(room, sender, message),
            ClientEvent::LeaveConsultation { room } => self.leave(connection, room),
        }
    }

    /// Adds `connection` to `room` and notifies the other members.
    ///
    /// The joining connection does not receive its own `user_joined`.
    /// Every call notifies, including a repeated join. Connections that are
    /// no longer registered are not added.
    pub fn join(&self, connection: ConnectionId, room: &str) -> usize {
        let outcome = self.rooms.join(room, connection);
        // Checked after the insert: a concurrent unregister either happened
        // before this check, or its disconnect runs after the insert.
        if self.get_sender(connection).is_none() {
            self.rooms.leave(room, connection);
            tracing::debug!(
                connection_id = %connection,
                room = %room,
                "ignored join from closed connection"
            );
            return 0;
        }
        tracing::info!(
            connection_id = %connection,
            room = %room,
            newly_joined = outcome.newly_joined,
            members = outcome.others.len() + 1,
            "joined consultation"
        );
        self.broadcast(&outcome.others, &ServerEvent::user_joined())
    }

    /// Broadcasts a chat message to every member of `room`, sender included.
    ///
    /// Membership of the sending connection is not checked. Sending to an
    /// unknown or empty room delivers nothing.
    pub fn send_message(&self, room: &str, sender: &str, message: &str) -> usize {
        let members = self.rooms.members(room);
        let event = ServerEvent::receive_message(message, sender, clock::now());
        let delivered = self.broadcast(&members, &event);
        tracing::debug!(
            room = %room,
            message_len = message.len(),
            delivered,
            "relayed chat message"
        );
        delivered
    }

    /// Removes `connection` from `room` and notifies the remaining members.
    ///
    /// The notification goes out even if `connection` was not a member.
    pub fn leave(&self, connection: ConnectionId, room: &str) -> usize {
        let outcome = self.rooms.leave(room, connection);
        tracing::info!(
            connection_id = %connection,
            room = %room,
            was_member = outcome.was_member,
            remaining = outcome.remaining.len(),
            "left consultation"
        );
        self.broadcast(&outcome.remaining, &ServerEvent::user_left())
    }

    /// Removes `connection` from every room and notifies the remaining
    /// members of each with `user_left`.
    ///
    /// Called when a connection ends, gracefully or not.
    pub fn disconnect(&self, connection: ConnectionId) -> usize {
        let left = self.rooms.leave_all(connection);
        let mut delivered = 0;
        for (room, remaining) in &left {
            tracing::info!(
                connection_id = %connection,
                room = %room,
                remaining = remaining.len(),
                "dropped from consultation on disconnect"
            );
            delivered += self.broadcast(remaining, &ServerEvent::user_left());
        }
        delivered
    }

    /// Sends an event to a single connection.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ConnectionLost`] if the connection is not
    /// registered or its channel is closed.
    pub fn send_to(&self, connection: ConnectionId, event: ServerEvent) -> Result<(), RelayError> {
        let sender = self
            .get_sender(connection)
            .ok_or(RelayError::ConnectionLost(connection))?;
        sender
            .send(event)
            .map_err(|_| RelayError::ConnectionLost(connection))
    }

    /// Delivers `event` to each target, returning how many accepted it.
    ///
    /// Targets whose channel has closed are treated as lost connections and
    /// cleaned up after the fan-out completes.
    fn broadcast(&self, targets: &[ConnectionId], event: &ServerEvent) -> usize {
        let mut delivered = 0;
        let mut lost = Vec::new();

        for &target in targets {
            match self.send_to(target, event.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(connection_id = %target, error = %e, "delivery failed");
                    lost.push(target);
                }
            }
        }

        for connection in lost {
            self.connection_lost(connection);
        }

        delivered
    }

    /// Unregisters a connection whose channel is gone and runs its
    /// disconnect cleanup.
    fn connection_lost(&self, connection: ConnectionId) {
        self.unregister(connection);
        self.disconnect(connection);
    }
}

/// Handles an upgraded WebSocket connection for a single client.
///
/// The connection lifecycle:
/// 1. Assign a [`ConnectionId`] and register an outbound channel.
/// 2. Spawn a writer task that encodes [`ServerEvent`]s into text frames.
/// 3. Read frames, applying each event in arrival order.
/// 4. On close or error, unregister and drop the connection from all rooms.
pub async fn handle_socket(
    socket: WebSocket,
    state: Arc<RelayState>,
    consultation: Option<String>,
) {
    let connection = ConnectionId::new();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    state.register(connection, tx);

    tracing::info!(
        connection_id = %connection,
        consultation = consultation.as_deref().unwrap_or("-"),
        "connection opened"
    );

    // Writer: forwards events from the channel to the WebSocket.
    let mut write_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match codec::encode_server(&event) {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!(
                        connection_id = %connection,
                        error = %e,
                        "failed to encode event"
                    );
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                tracing::warn!(connection_id = %connection, "WebSocket write failed");
                return;
            }
        }
        // Channel closed by the relay: say goodbye.
        let _ = ws_sender.send(Message::Close(None)).await;
    });

    // Reader: applies inbound events.
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(frame) = ws_receiver.next().await {
            let msg = match frame {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(
                        connection_id = %connection,
                        error = %e,
                        "WebSocket read failed"
                    );
                    break;
                }
            };
            match msg {
                Message::Text(text) => {
                    if let Err(e) = reader_state.handle_text(connection, text.as_str()) {
                        reject(&reader_state, connection, &e);
                    }
                }
                Message::Binary(_) => {
                    let e = RelayError::InvalidPayload("expected a text frame".to_string());
                    reject(&reader_state, connection, &e);
                }
                Message::Close(_) => {
                    tracing::info!(connection_id = %connection, "received close frame");
                    break;
                }
                _ => {
                    // Ping/pong are answered by the transport.
                }
            }
        }
    });

    // Wait for the aborted side to actually stop: a reader mid-`handle_text`
    // has no await point and could otherwise re-join a room after cleanup.
    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
            let _ = write_task.await;
        }
        _ = &mut write_task => {
            read_task.abort();
            let _ = read_task.await;
        }
    }

    state.unregister(connection);
    let notified = state.disconnect(connection);
    tracing::info!(connection_id = %connection, notified, "connection closed");
}

/// Reports a rejected event back to the connection that sent it.
fn reject(state: &RelayState, connection: ConnectionId, error: &RelayError) {
    tracing::warn!(connection_id = %connection, error = %error, "rejected event");
    if let Err(e) = state.send_to(connection, ServerEvent::error(error.to_string())) {
        tracing::debug!(connection_id = %connection, error = %e, "could not report rejection");
    }
}

/// Starts the relay server on the given address and returns the bound address
/// and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(RelayState::new())).await
}

/// Starts the relay server with a pre-configured [`RelayState`].
///
/// Use [`RelayState::with_config`] to apply the payload size limit from the
/// resolved [`crate::config::RelayConfig`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "relay server error");
        }
    });

    Ok((bound_addr, handle))
}

/// Builds the axum router serving the consultation channel.
pub fn router(state: Arc<RelayState>) -> axum::Router {
    axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .route(
            "/consultation/{consultation_id}/ws",
            axum::routing::get(consultation_ws_handler),
        )
        .with_state(state)
}

/// Starts the relay server in-process for testing.
///
/// Binds to `127.0.0.1:0` (OS-assigned port).
#[cfg(test)]
pub async fn start_test_server() -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    start_server("127.0.0.1:0")
        .await
        .expect("failed to start test server")
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<RelayState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, None))
}

/// Same as [`ws_handler`], tagging the connection's logs with the
/// consultation id from the URL.
async fn consultation_ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::Path(consultation_id): axum::extract::Path<String>,
    axum::extract::State(state): axum::extract::State<Arc<RelayState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, Some(consultation_id)))
}
