//! Telecare consultation relay library.
//!
//! Exposes the relay server for use in tests and embedding. The relay
//! accepts WebSocket connections, tracks which connections have joined which
//! consultation room, and fans chat events out to room members.

pub mod config;
pub mod connection;
pub mod relay;
pub mod rooms;
