//! emu-protocol - Wire protocol for the emud control listeners
//!
//! The same JSON messages are carried by the stream listener (one message
//! per line) and the datagram listener (one message per datagram).

pub mod frame;
pub mod message;
pub mod version;

pub use frame::{decode_request, encode_response, FrameError, MAX_DATAGRAM_SIZE, MAX_LINE_SIZE};
pub use message::{ClientMessage, DaemonMessage, DaemonStatus, MessageType};
pub use version::ProtocolVersion;
