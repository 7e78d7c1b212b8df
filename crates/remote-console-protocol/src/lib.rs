//! Wire protocol for the remote debug console port.
//!
//! Provides:
//! - Frame encoding for outgoing commands
//! - Header and payload decoding for inbound frames
//! - `ProtocolError` for every malformed-frame case

pub mod codec;

pub use codec::{
    CMD_PREFIX, FrameHeader, HEADER_SIZE, MESSAGE_TYPE, Message, ProtocolError, decode_header,
    decode_message, decode_payload, encode,
};
