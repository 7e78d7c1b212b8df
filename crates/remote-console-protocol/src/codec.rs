//! Frame codec for the debug console port.
//!
//! Every frame is an 8-byte header followed by the payload:
//!
//! ```text
//! [u32 LE: payload length][u32 LE: message type][payload bytes]
//! ```
//!
//! Outgoing payloads are `CMD:65535:<command>\0`. Inbound payloads use the
//! same layout and may carry a trailing NUL.

use std::string::FromUtf8Error;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Message type carried by every command frame.
pub const MESSAGE_TYPE: u32 = 3;

/// ASCII prefix of every command payload.
pub const CMD_PREFIX: &str = "CMD:65535:";

/// Header size in bytes (length + type).
pub const HEADER_SIZE: usize = 8;

/// Protocol error.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Header too short: expected {expected} bytes, got {actual}")]
    HeaderTooShort { expected: usize, actual: usize },
    #[error("Payload length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("Failed to decode payload: {0}")]
    InvalidUtf8(#[from] FromUtf8Error),
    #[error("Payload too large: {length} bytes exceeds limit of {limit}")]
    PayloadTooLarge { length: usize, limit: usize },
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Payload length in bytes.
    pub length: u32,
    /// Message type.
    pub msg_type: u32,
}

impl FrameHeader {
    /// Payload length as `usize`, rejecting anything above `limit`.
    ///
    /// # Errors
    /// Returns `PayloadTooLarge` if the announced length exceeds `limit`.
    pub fn payload_len(&self, limit: usize) -> Result<usize, ProtocolError> {
        let length = self.length as usize;
        if length > limit {
            return Err(ProtocolError::PayloadTooLarge { length, limit });
        }
        Ok(length)
    }
}

/// Decoded inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub msg_type: u32,
    pub payload: String,
}

/// Encode a command into a complete frame.
///
/// # Errors
/// Returns `PayloadTooLarge` if the payload does not fit the 32-bit length field.
pub fn encode(command: &str) -> Result<Bytes, ProtocolError> {
    let length = CMD_PREFIX.len() + command.len() + 1;
    let wire_len = u32::try_from(length).map_err(|_| ProtocolError::PayloadTooLarge {
        length,
        limit: u32::MAX as usize,
    })?;

    let mut frame = BytesMut::with_capacity(HEADER_SIZE + length);
    frame.put_u32_le(wire_len);
    frame.put_u32_le(MESSAGE_TYPE);
    frame.put_slice(CMD_PREFIX.as_bytes());
    frame.put_slice(command.as_bytes());
    frame.put_u8(0);

    Ok(frame.freeze())
}

/// Decode the header at the start of `data`.
///
/// # Errors
/// Returns `HeaderTooShort` if fewer than [`HEADER_SIZE`] bytes are supplied.
pub fn decode_header(data: &[u8]) -> Result<FrameHeader, ProtocolError> {
    if data.len() < HEADER_SIZE {
        return Err(ProtocolError::HeaderTooShort {
            expected: HEADER_SIZE,
            actual: data.len(),
        });
    }

    let mut buf = &data[..HEADER_SIZE];
    Ok(FrameHeader {
        length: buf.get_u32_le(),
        msg_type: buf.get_u32_le(),
    })
}

/// Decode payload bytes into a string, dropping one trailing NUL.
///
/// # Errors
/// Returns `InvalidUtf8` if the bytes are not valid UTF-8.
pub fn decode_payload(data: &[u8]) -> Result<String, ProtocolError> {
    let data = data.strip_suffix(b"\0").unwrap_or(data);
    Ok(String::from_utf8(data.to_vec())?)
}

/// Decode a complete message from its header and payload bytes.
///
/// The payload size must match the header's length field exactly; the
/// protocol has no checksum, so this is the only integrity check.
///
/// # Errors
/// Returns error if the header is short, the length disagrees, or the
/// payload is not UTF-8.
pub fn decode_message(header: &[u8], payload: &[u8]) -> Result<Message, ProtocolError> {
    let FrameHeader { length, msg_type } = decode_header(header)?;

    if payload.len() != length as usize {
        return Err(ProtocolError::LengthMismatch {
            expected: length as usize,
            actual: payload.len(),
        });
    }

    tracing::trace!(length, msg_type, "decoded frame");

    Ok(Message {
        msg_type,
        payload: decode_payload(payload)?,
    })
}
