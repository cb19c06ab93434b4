//! Frame header with zero-copy parsing.
//!
//! The header is a fixed 8-byte structure serialized as raw binary (Big
//! Endian). A session reads exactly [`FrameHeader::SIZE`] bytes, validates
//! them, and only then knows how many body bytes to read.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::errors::{ProtocolError, Result};

/// Kind of message carried by a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Initial, non-reply message of a session
    Ping,
    /// Acknowledgement of a peer's ping
    Pong,
    /// Application payload, delivered without reply
    Payload,
}

impl MessageKind {
    /// Wire value of this kind.
    #[must_use]
    pub const fn to_u8(self) -> u8 {
        match self {
            Self::Ping => 0x01,
            Self::Pong => 0x02,
            Self::Payload => 0x03,
        }
    }

    /// Parse a wire value. `None` for unknown kinds.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Ping),
            0x02 => Some(Self::Pong),
            0x03 => Some(Self::Payload),
            _ => None,
        }
    }
}

/// Fixed 8-byte frame header (Big Endian network byte order)
///
/// Fields are stored as raw byte arrays so every 8-byte pattern is a valid
/// value and the struct can be cast directly from untrusted input.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct FrameHeader {
    magic: [u8; 2],                   // 0x534E ("SN")
    version: u8,                      // 0x01
    kind: u8,                         // MessageKind
    pub(crate) payload_size: [u8; 4], // u32 body length
}

impl FrameHeader {
    /// Size of the serialized header
    pub const SIZE: usize = 8;

    /// Magic number: "SN" in ASCII
    pub const MAGIC: u16 = 0x534E;

    /// Current protocol version
    pub const VERSION: u8 = 0x01;

    /// Maximum body size (1 MiB)
    pub const MAX_PAYLOAD_SIZE: u32 = 1024 * 1024;

    /// Create a header for the given kind with an empty body.
    #[must_use]
    pub fn new(kind: MessageKind) -> Self {
        Self {
            magic: Self::MAGIC.to_be_bytes(),
            version: Self::VERSION,
            kind: kind.to_u8(),
            payload_size: [0; 4],
        }
    }

    /// Parse and validate a header from the front of `bytes`.
    ///
    /// Validation runs cheapest first: length, magic, version, kind, size.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooShort` if fewer than 8 bytes are available
    /// - `ProtocolError::InvalidMagic` if the magic number is wrong
    /// - `ProtocolError::UnsupportedVersion` for any version other than 1
    /// - `ProtocolError::UnknownKind` for an unrecognized kind byte
    /// - `ProtocolError::PayloadTooLarge` if the claimed size exceeds the
    ///   maximum
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let (header, _) = Self::ref_from_prefix(bytes).map_err(|_| {
            ProtocolError::FrameTooShort { expected: Self::SIZE, actual: bytes.len() }
        })?;

        if u16::from_be_bytes(header.magic) != Self::MAGIC {
            return Err(ProtocolError::InvalidMagic);
        }

        if header.version != Self::VERSION {
            return Err(ProtocolError::UnsupportedVersion(header.version));
        }

        if MessageKind::from_u8(header.kind).is_none() {
            return Err(ProtocolError::UnknownKind(header.kind));
        }

        if header.payload_size() > Self::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: header.payload_size() as usize,
                max: Self::MAX_PAYLOAD_SIZE as usize,
            });
        }

        Ok(header)
    }

    /// Raw header bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out.copy_from_slice(self.as_bytes());
        out
    }

    /// Message kind. `None` only for headers that bypassed validation.
    #[must_use]
    pub fn kind(&self) -> Option<MessageKind> {
        MessageKind::from_u8(self.kind)
    }

    /// Body length in bytes.
    #[must_use]
    pub fn payload_size(&self) -> u32 {
        u32::from_be_bytes(self.payload_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_header_round_trips_through_bytes() {
        let header = FrameHeader::new(MessageKind::Pong);
        let bytes = header.to_bytes();

        let parsed = FrameHeader::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.kind(), Some(MessageKind::Pong));
        assert_eq!(parsed.payload_size(), 0);
    }

    #[test]
    fn rejects_short_buffer() {
        let result = FrameHeader::from_bytes(&[0x53, 0x4E, 0x01]);
        assert_eq!(result.unwrap_err(), ProtocolError::FrameTooShort { expected: 8, actual: 3 });
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = FrameHeader::new(MessageKind::Ping).to_bytes();
        bytes[0] = 0xFF;
        assert_eq!(FrameHeader::from_bytes(&bytes).unwrap_err(), ProtocolError::InvalidMagic);
    }

    #[test]
    fn rejects_unknown_version_and_kind() {
        let mut bytes = FrameHeader::new(MessageKind::Ping).to_bytes();
        bytes[2] = 0x09;
        assert_eq!(
            FrameHeader::from_bytes(&bytes).unwrap_err(),
            ProtocolError::UnsupportedVersion(0x09)
        );

        let mut bytes = FrameHeader::new(MessageKind::Ping).to_bytes();
        bytes[3] = 0x7F;
        assert_eq!(FrameHeader::from_bytes(&bytes).unwrap_err(), ProtocolError::UnknownKind(0x7F));
    }

    #[test]
    fn rejects_oversized_claim() {
        let mut bytes = FrameHeader::new(MessageKind::Payload).to_bytes();
        bytes[4..8].copy_from_slice(&(FrameHeader::MAX_PAYLOAD_SIZE + 1).to_be_bytes());
        assert!(matches!(
            FrameHeader::from_bytes(&bytes),
            Err(ProtocolError::PayloadTooLarge { .. })
        ));
    }
}
