//! Fuzz target for Frame::decode and Message::from_frame
//!
//! Arbitrary bytes go through the same path a session's reader takes:
//! header validation, body length check, CBOR body decode.
//!
//! The fuzzer should NEVER panic. All invalid inputs should return an error.

#![no_main]

use libfuzzer_sys::fuzz_target;
use simnet_proto::{Frame, Message};

fuzz_target!(|data: &[u8]| {
    if let Ok(frame) = Frame::decode(data) {
        let _ = Message::from_frame(&frame);
    }
});
