//! Shared protocol definitions for the Telecare consultation channel.

pub mod clock;
pub mod codec;
pub mod consultation;
