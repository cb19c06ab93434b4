//! Property-based tests for frame and message decoding.
//!
//! Decoding runs on bytes read straight off a peer connection, so it must
//! reject garbage with an error and never panic.

use proptest::prelude::*;
use simnet_proto::{Frame, FrameHeader, Message, MessageKind, ProtocolError};

fn arbitrary_kind() -> impl Strategy<Value = MessageKind> {
    prop_oneof![Just(MessageKind::Ping), Just(MessageKind::Pong), Just(MessageKind::Payload)]
}

fn arbitrary_message() -> impl Strategy<Value = Message> {
    (arbitrary_kind(), any::<u64>(), prop::collection::vec(any::<u8>(), 0..512))
        .prop_map(|(kind, created_ms, data)| Message { kind, created_ms, data })
}

proptest! {
    #[test]
    fn decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = Frame::decode(&bytes);
    }

    #[test]
    fn message_from_arbitrary_body_never_panics(
        kind in arbitrary_kind(),
        body in prop::collection::vec(any::<u8>(), 0..256),
    ) {
        let frame = Frame::new(kind, body);
        let _ = Message::from_frame(&frame);
    }

    #[test]
    fn framed_message_decodes_to_itself(message in arbitrary_message()) {
        let frame = message.clone().into_frame().unwrap();
        let mut wire = Vec::new();
        frame.encode(&mut wire).unwrap();

        let decoded = Frame::decode(&wire).unwrap();
        prop_assert_eq!(Message::from_frame(&decoded).unwrap(), message);
    }

    #[test]
    fn any_strict_prefix_is_rejected(message in arbitrary_message(), cut in 0usize..64) {
        let frame = message.into_frame().unwrap();
        let mut wire = Vec::new();
        frame.encode(&mut wire).unwrap();

        let cut = cut.min(wire.len() - 1);
        let err = Frame::decode(&wire[..cut]).unwrap_err();
        prop_assert!(
            matches!(
                err,
                ProtocolError::FrameTooShort { .. } | ProtocolError::FrameTruncated { .. }
            ),
            "unexpected error for {}-byte prefix: {:?}",
            cut,
            err
        );
    }
}

#[test]
fn decoded_header_equals_encoded_header() {
    let frame = Frame::new(MessageKind::Pong, vec![0xA0]);
    let mut wire = Vec::new();
    frame.encode(&mut wire).unwrap();

    let decoded = Frame::decode(&wire).unwrap();
    assert_eq!(decoded.header, frame.header);
    assert_eq!(decoded, frame);
}

#[test]
fn header_size_is_stable() {
    assert_eq!(FrameHeader::SIZE, 8);
    assert_eq!(Frame::new(MessageKind::Ping, Vec::new()).encoded_len(), 8);
}
