//! Wire protocol for simnet peer sessions.
//!
//! Every message exchanged by a peer session travels as a [`Frame`]: a fixed
//! 8-byte [`FrameHeader`] (Big Endian) followed by a CBOR body. The header
//! carries the [`MessageKind`] so a session can tell a ping from a pong
//! without parsing the body.
//!
//! # Layers
//!
//! - [`FrameHeader`]: raw binary header, parsed zero-copy
//! - [`Frame`]: header + raw body bytes, no deserialization
//! - [`Message`]: typed view of a frame (kind, creation time, payload)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod errors;
mod frame;
mod header;
mod message;

pub use errors::{ProtocolError, Result};
pub use frame::Frame;
pub use header::{FrameHeader, MessageKind};
pub use message::Message;
