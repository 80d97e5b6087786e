//! Framing helpers shared by the stream and datagram transports.
//!
//! A frame is one JSON message. Stream transports terminate it with a
//! newline, datagram transports send it as the whole payload.

use crate::message::{ClientMessage, DaemonMessage};
use thiserror::Error;

/// Maximum size of a newline-delimited message on a stream (1 MB).
pub const MAX_LINE_SIZE: usize = 1_048_576;

/// Maximum size of a datagram payload.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Errors that can occur while decoding or encoding a frame.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Message too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Empty message")]
    Empty,

    #[error("Invalid message: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decodes one client request, ignoring surrounding whitespace.
pub fn decode_request(frame: &[u8], max: usize) -> Result<ClientMessage, FrameError> {
    if frame.len() > max {
        return Err(FrameError::TooLarge {
            size: frame.len(),
            max,
        });
    }

    let trimmed = frame.trim_ascii();
    if trimmed.is_empty() {
        return Err(FrameError::Empty);
    }

    Ok(serde_json::from_slice(trimmed)?)
}

/// Encodes a daemon response without a trailing newline.
pub fn encode_response(message: &DaemonMessage) -> Result<Vec<u8>, FrameError> {
    Ok(serde_json::to_vec(message)?)
}
