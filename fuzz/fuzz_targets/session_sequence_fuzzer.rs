//! Fuzz target for the peer session state machine
//!
//! Feeds arbitrary message sequences to a started session.
//!
//! # Invariants
//!
//! - State never moves backwards
//! - At most one ping is ever sent and at most one pong acknowledged
//! - Every accepted ping produces exactly one pong
//! - NEVER panic

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use simnet_core::{NodeId, PeerSession, Role, SessionAction, SessionState};
use simnet_proto::{Message, MessageKind};

#[derive(Debug, Clone, Arbitrary)]
enum Input {
    Ping(u64),
    Pong(u64),
    Payload(Vec<u8>),
    Restart,
}

fn rank(state: SessionState) -> u8 {
    match state {
        SessionState::Idle => 0,
        SessionState::AwaitingReply => 1,
        SessionState::Terminated => 2,
    }
}

fuzz_target!(|inputs: Vec<Input>| {
    let mut session = PeerSession::new(NodeId::from_bytes([1; 32]), Role::Responder);
    let _ = session.start(0);
    let mut previous = session.state();
    let mut pings = 0u32;

    for input in inputs {
        let result = match input {
            Input::Ping(ms) => session.handle_message(Message::ping(ms), ms),
            Input::Pong(ms) => session.handle_message(Message::pong(ms), ms),
            Input::Payload(data) => session.handle_message(Message::payload(data, 0), 0),
            Input::Restart => session.start(0),
        };

        if let Ok(actions) = result {
            for action in actions {
                if let SessionAction::Send(message) = action {
                    if message.kind == MessageKind::Pong {
                        pings += 1;
                    }
                }
            }
        }

        assert!(rank(session.state()) >= rank(previous));
        previous = session.state();
    }

    let stats = session.stats();
    assert_eq!(stats.pings_sent, 1);
    assert!(stats.pongs_received <= 1);
    assert_eq!(stats.pongs_sent, pings);
});
