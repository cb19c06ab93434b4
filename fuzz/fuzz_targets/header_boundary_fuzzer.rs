//! Fuzz target for frame header boundary conditions
//!
//! # Strategy
//!
//! - Magic bytes: valid, off-by-one, all-zeros, random
//! - Version: valid, zero, random
//! - Kind: every known value plus random
//! - Payload size: zero, at-max, just-over-max, `u32::MAX`, random
//!
//! # Invariants
//!
//! - Validation order is magic, version, kind, size, truncation
//! - `payload_size > MAX_PAYLOAD_SIZE` MUST return `PayloadTooLarge`
//! - A header that validates MUST announce a body no larger than the limit
//! - NEVER panic

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use simnet_proto::{Frame, FrameHeader, MessageKind, ProtocolError};

#[derive(Debug, Clone, Arbitrary)]
struct BoundaryHeader {
    magic: MagicBytes,
    version: VersionByte,
    kind: u8,
    payload_size: PayloadSize,
    body: Vec<u8>,
}

#[derive(Debug, Clone, Arbitrary)]
enum MagicBytes {
    Valid,
    OffByOne(u8),
    AllZeros,
    Random([u8; 2]),
}

#[derive(Debug, Clone, Arbitrary)]
enum VersionByte {
    Valid,
    Zero,
    Random(u8),
}

#[derive(Debug, Clone, Arbitrary)]
enum PayloadSize {
    Zero,
    BodyLength,
    AtMax,
    JustOverMax,
    MaxU32,
    Random(u32),
}

fuzz_target!(|input: BoundaryHeader| {
    let magic = match input.magic {
        MagicBytes::Valid => FrameHeader::MAGIC.to_be_bytes(),
        MagicBytes::OffByOne(delta) => {
            FrameHeader::MAGIC.wrapping_add(u16::from(delta.max(1))).to_be_bytes()
        },
        MagicBytes::AllZeros => [0, 0],
        MagicBytes::Random(bytes) => bytes,
    };
    let version = match input.version {
        VersionByte::Valid => FrameHeader::VERSION,
        VersionByte::Zero => 0,
        VersionByte::Random(v) => v,
    };
    let size = match input.payload_size {
        PayloadSize::Zero => 0,
        PayloadSize::BodyLength => input.body.len() as u32,
        PayloadSize::AtMax => FrameHeader::MAX_PAYLOAD_SIZE,
        PayloadSize::JustOverMax => FrameHeader::MAX_PAYLOAD_SIZE + 1,
        PayloadSize::MaxU32 => u32::MAX,
        PayloadSize::Random(n) => n,
    };

    let mut bytes = Vec::with_capacity(FrameHeader::SIZE + input.body.len());
    bytes.extend_from_slice(&magic);
    bytes.push(version);
    bytes.push(input.kind);
    bytes.extend_from_slice(&size.to_be_bytes());
    bytes.extend_from_slice(&input.body);

    let magic_ok = u16::from_be_bytes(magic) == FrameHeader::MAGIC;
    let version_ok = version == FrameHeader::VERSION;
    let kind_ok = MessageKind::from_u8(input.kind).is_some();

    match FrameHeader::from_bytes(&bytes) {
        Ok(header) => {
            assert!(magic_ok && version_ok && kind_ok);
            assert!(header.payload_size() <= FrameHeader::MAX_PAYLOAD_SIZE);
        },
        Err(ProtocolError::InvalidMagic) => assert!(!magic_ok),
        Err(ProtocolError::UnsupportedVersion(v)) => {
            assert!(magic_ok);
            assert_eq!(v, version);
        },
        Err(ProtocolError::UnknownKind(k)) => {
            assert!(magic_ok && version_ok);
            assert_eq!(k, input.kind);
        },
        Err(ProtocolError::PayloadTooLarge { .. }) => {
            assert!(magic_ok && version_ok && kind_ok);
            assert!(size > FrameHeader::MAX_PAYLOAD_SIZE);
        },
        Err(_) => {},
    }

    let _ = Frame::decode(&bytes);
});
