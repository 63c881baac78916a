//! JSON text-frame encoding for the consultation channel.
//!
//! Inbound frames are decoded into [`ClientEvent`] and validated before the
//! relay acts on them; outbound [`ServerEvent`]s are serialized into the
//! same `{"event", "data"}` envelope.

use crate::consultation::{ClientEvent, ServerEvent};

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The frame is not valid JSON, names an unknown event, or has a missing
    /// or wrong-typed field.
    #[error("malformed event: {0}")]
    Malformed(String),
    /// The event decoded but addresses an empty room key.
    #[error("room must be a non-empty string")]
    EmptyRoom,
    /// Serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Decodes and validates a client event from a text frame.
///
/// # Errors
///
/// Returns [`CodecError::Malformed`] if the frame cannot be deserialized, or
/// [`CodecError::EmptyRoom`] if the room key is empty.
pub fn decode_client(text: &str) -> Result<ClientEvent, CodecError> {
    let event: ClientEvent =
        serde_json::from_str(text).map_err(|e| CodecError::Malformed(e.to_string()))?;
    if event.room().is_empty() {
        return Err(CodecError::EmptyRoom);
    }
    Ok(event)
}

/// Encodes a client event into a text frame.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the event cannot be serialized.
pub fn encode_client(event: &ClientEvent) -> Result<String, CodecError> {
    serde_json::to_string(event).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a server event from a text frame.
///
/// # Errors
///
/// Returns [`CodecError::Malformed`] if the frame cannot be deserialized.
pub fn decode_server(text: &str) -> Result<ServerEvent, CodecError> {
    serde_json::from_str(text).map_err(|e| CodecError::Malformed(e.to_string()))
}

/// Encodes a server event into a text frame.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the event cannot be serialized.
pub fn encode_server(event: &ServerEvent) -> Result<String, CodecError> {
    serde_json::to_string(event).map_err(|e| CodecError::Serialization(e.to_string()))
}
