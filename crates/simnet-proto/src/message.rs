//! Typed session messages.
//!
//! Bodies are CBOR maps `{created_ms, data}`. CBOR is self-describing and
//! needs no code generation; a session only decodes bodies after the header
//! has been validated.

use bytes::BufMut;
use serde::{Deserialize, Serialize};

use crate::{
    Frame, FrameHeader, MessageKind,
    errors::{ProtocolError, Result},
};

/// CBOR body shared by every message kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Body {
    created_ms: u64,
    data: Vec<u8>,
}

/// A decoded session message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// What the message means to the session state machine
    pub kind: MessageKind,
    /// Sender wall-clock time in milliseconds since the Unix epoch
    pub created_ms: u64,
    /// Opaque payload; empty for ping and pong
    pub data: Vec<u8>,
}

impl Message {
    /// Initial, non-reply message.
    #[must_use]
    pub fn ping(created_ms: u64) -> Self {
        Self { kind: MessageKind::Ping, created_ms, data: Vec::new() }
    }

    /// Acknowledgement of a peer's ping.
    #[must_use]
    pub fn pong(created_ms: u64) -> Self {
        Self { kind: MessageKind::Pong, created_ms, data: Vec::new() }
    }

    /// Application payload.
    #[must_use]
    pub fn payload(data: impl Into<Vec<u8>>, created_ms: u64) -> Self {
        Self { kind: MessageKind::Payload, created_ms, data: data.into() }
    }

    /// `true` for pongs.
    #[must_use]
    pub fn is_ack(&self) -> bool {
        self.kind == MessageKind::Pong
    }

    /// Encode the CBOR body into `dst`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn encode_body(&self, dst: &mut impl BufMut) -> Result<()> {
        let body = Body { created_ms: self.created_ms, data: self.data.clone() };
        ciborium::ser::into_writer(&body, dst.writer())
            .map_err(|e| ProtocolError::CborEncode(e.to_string()))
    }

    /// Wrap this message in a frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    /// - `ProtocolError::PayloadTooLarge` if the body exceeds the maximum
    pub fn into_frame(self) -> Result<Frame> {
        let mut body = Vec::with_capacity(16 + self.data.len());
        self.encode_body(&mut body)?;

        if body.len() > FrameHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: body.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        Ok(Frame::new(self.kind, body))
    }

    /// Decode a message from a validated frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnknownKind` if the header kind is not recognized
    /// - `ProtocolError::CborDecode` if the body is not a valid CBOR body
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let Some(kind) = frame.kind() else {
            return Err(ProtocolError::UnknownKind(frame.header.to_bytes()[3]));
        };

        let body: Body = ciborium::de::from_reader(frame.payload.as_ref())
            .map_err(|e| ProtocolError::CborDecode(e.to_string()))?;

        Ok(Self { kind, created_ms: body.created_ms, data: body.data })
    }
}
