#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::future_not_send
)]

//! End-to-end tests for consultation chat over real WebSocket connections.
//!
//! Covers joining, room-scoped fan-out, leaving, and rejection of malformed
//! events.
//!
//! Verification command: `cargo test --test consultation_chat`

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use telecare_proto::clock;
use telecare_proto::codec;
use telecare_proto::consultation::{ClientEvent, ServerEvent, USER_JOINED_TEXT, USER_LEFT_TEXT};
use telecare_relay::relay::start_server;
use tokio_tungstenite::tungstenite;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// How long to wait before concluding that nothing is coming.
const QUIET_PERIOD: Duration = Duration::from_millis(200);

async fn start_relay() -> std::net::SocketAddr {
    let (addr, _handle) = start_server("127.0.0.1:0")
        .await
        .expect("failed to start test relay");
    addr
}

async fn connect(addr: std::net::SocketAddr) -> WsStream {
    let url = format!("ws://{addr}/ws");
    let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    ws
}

async fn send(ws: &mut WsStream, event: &ClientEvent) {
    let text = codec::encode_client(event).unwrap();
    ws.send(tungstenite::Message::Text(text.into()))
        .await
        .unwrap();
}

async fn send_raw(ws: &mut WsStream, text: &str) {
    ws.send(tungstenite::Message::Text(text.to_string().into()))
        .await
        .unwrap();
}

async fn recv(ws: &mut WsStream) -> ServerEvent {
    let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for event")
        .expect("stream ended")
        .expect("read failed");
    codec::decode_server(frame.to_text().unwrap()).unwrap()
}

async fn assert_quiet(ws: &mut WsStream) {
    if let Ok(frame) = tokio::time::timeout(QUIET_PERIOD, ws.next()).await {
        panic!("expected no event, got {frame:?}");
    }
}

fn join(room: &str) -> ClientEvent {
    ClientEvent::JoinConsultation {
        room: room.to_string(),
    }
}

fn leave(room: &str) -> ClientEvent {
    ClientEvent::LeaveConsultation {
        room: room.to_string(),
    }
}

fn chat(room: &str, sender: &str, message: &str) -> ClientEvent {
    ClientEvent::SendMessage {
        room: room.to_string(),
        message: message.to_string(),
        sender: sender.to_string(),
    }
}

/// Joins `room` alone and waits for proof the join was applied: a message to
/// the room comes back to the sender.
async fn join_alone(ws: &mut WsStream, room: &str) {
    send(ws, &join(room)).await;
    send(ws, &chat(room, "ping", "ping")).await;
    assert!(matches!(recv(ws).await, ServerEvent::ReceiveMessage { .. }));
}

#[tokio::test]
async fn joiner_is_announced_to_existing_members_only() {
    let addr = start_relay().await;
    let mut doctor = connect(addr).await;
    let mut patient = connect(addr).await;

    join_alone(&mut doctor, "consult-1").await;
    send(&mut patient, &join("consult-1")).await;

    assert_eq!(
        recv(&mut doctor).await,
        ServerEvent::UserJoined {
            message: USER_JOINED_TEXT.to_string()
        }
    );
    assert_quiet(&mut patient).await;
}

#[tokio::test]
async fn message_reaches_room_members_and_not_outsiders() {
    let addr = start_relay().await;
    let mut alice = connect(addr).await;
    let mut bob = connect(addr).await;
    let mut carol = connect(addr).await;

    join_alone(&mut alice, "consult-1").await;
    send(&mut bob, &join("consult-1")).await;
    assert!(matches!(recv(&mut alice).await, ServerEvent::UserJoined { .. }));
    join_alone(&mut carol, "consult-2").await;

    send(&mut alice, &chat("consult-1", "Alice", "hello")).await;

    for ws in [&mut alice, &mut bob] {
        match recv(ws).await {
            ServerEvent::ReceiveMessage {
                message,
                sender,
                timestamp,
            } => {
                assert_eq!(message, "hello");
                assert_eq!(sender, "Alice");
                assert!(clock::is_valid(&timestamp), "bad timestamp {timestamp}");
            }
            other => panic!("expected ReceiveMessage, got {other:?}"),
        }
    }
    assert_quiet(&mut carol).await;
}

#[tokio::test]
async fn messages_from_one_sender_arrive_in_order() {
    let addr = start_relay().await;
    let mut alice = connect(addr).await;
    let mut bob = connect(addr).await;

    join_alone(&mut alice, "consult-1").await;
    send(&mut bob, &join("consult-1")).await;
    assert!(matches!(recv(&mut alice).await, ServerEvent::UserJoined { .. }));

    for i in 0..10 {
        send(&mut alice, &chat("consult-1", "Alice", &format!("msg {i}"))).await;
    }
    for i in 0..10 {
        match recv(&mut bob).await {
            ServerEvent::ReceiveMessage { message, .. } => assert_eq!(message, format!("msg {i}")),
            other => panic!("expected ReceiveMessage, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn send_to_empty_room_is_silent() {
    let addr = start_relay().await;
    let mut alice = connect(addr).await;

    send(&mut alice, &chat("nobody-here", "Alice", "anyone?")).await;
    assert_quiet(&mut alice).await;
}

#[tokio::test]
async fn leaver_stops_receiving_and_others_are_told() {
    let addr = start_relay().await;
    let mut doctor = connect(addr).await;
    let mut patient = connect(addr).await;

    join_alone(&mut doctor, "consult-9").await;
    send(&mut patient, &join("consult-9")).await;
    assert!(matches!(recv(&mut doctor).await, ServerEvent::UserJoined { .. }));

    send(&mut patient, &leave("consult-9")).await;
    assert_eq!(
        recv(&mut doctor).await,
        ServerEvent::UserLeft {
            message: USER_LEFT_TEXT.to_string()
        }
    );

    send(&mut doctor, &chat("consult-9", "Dr. Sarah Johnson", "are you there?")).await;
    assert!(matches!(recv(&mut doctor).await, ServerEvent::ReceiveMessage { .. }));
    assert_quiet(&mut patient).await;
}

#[tokio::test]
async fn malformed_event_is_rejected_for_sender_only() {
    let addr = start_relay().await;
    let mut alice = connect(addr).await;
    let mut bob = connect(addr).await;

    join_alone(&mut alice, "consult-1").await;
    send(&mut bob, &join("consult-1")).await;
    assert!(matches!(recv(&mut alice).await, ServerEvent::UserJoined { .. }));

    send_raw(
        &mut bob,
        r#"{"event":"send_message","data":{"room":"consult-1","message":"no sender"}}"#,
    )
    .await;

    match recv(&mut bob).await {
        ServerEvent::Error { reason } => assert!(reason.contains("sender"), "got: {reason}"),
        other => panic!("expected Error, got {other:?}"),
    }
    assert_quiet(&mut alice).await;

    // The connection stays usable after a rejection.
    send(&mut bob, &chat("consult-1", "Bob", "fixed")).await;
    assert!(matches!(recv(&mut alice).await, ServerEvent::ReceiveMessage { .. }));
}

#[tokio::test]
async fn empty_room_key_is_rejected() {
    let addr = start_relay().await;
    let mut alice = connect(addr).await;

    send_raw(&mut alice, r#"{"event":"join_consultation","data":{"room":""}}"#).await;
    match recv(&mut alice).await {
        ServerEvent::Error { reason } => assert!(reason.contains("non-empty"), "got: {reason}"),
        other => panic!("expected Error, got {other:?}"),
    }
}
