//! Per-connection peer session state machine.
//!
//! A session announces itself with exactly one ping, answers every ping it
//! receives with exactly one pong, and is done once its own ping has been
//! acknowledged. Uses the action pattern: methods take time as input and
//! return actions for the driver to execute.
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐  start (send ping)  ┌───────────────┐  pong received  ┌────────────┐
//! │ Idle │────────────────────>│ AwaitingReply │────────────────>│ Terminated │
//! └──────┘                     └───────────────┘                 └────────────┘
//!                                 │        ↑
//!                                 └────────┘
//!                         ping → send pong, payload → deliver
//! ```
//!
//! Termination is local: the peer may still be waiting for its own pong, so
//! the driver keeps the transport open until the shared
//! [`CompletionBarrier`](crate::CompletionBarrier) releases.

use serde::Serialize;
use simnet_proto::{Message, MessageKind};

use crate::{error::SessionError, node_id::NodeId};

/// Actions returned by the session state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Encode and write this message to the peer
    Send(Message),

    /// Our ping was acknowledged; release one barrier unit
    Acknowledged,

    /// Hand this payload to the observer; no reply is sent
    Deliver(Message),
}

/// Session state. Transitions are monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SessionState {
    /// Created, ping not yet sent
    Idle,
    /// Ping sent, waiting for the peer's pong
    AwaitingReply,
    /// Pong received
    Terminated,
}

/// Which side of the connection opened it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Role {
    /// Dialing side
    Initiator,
    /// Accepting side
    Responder,
}

/// Message counters for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Pings written (at most one)
    pub pings_sent: u32,
    /// Pongs written, one per ping received
    pub pongs_sent: u32,
    /// Pongs received (at most one)
    pub pongs_received: u32,
    /// Payloads delivered to the observer
    pub payloads_received: u32,
}

/// Final view of a session, returned by the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    /// Remote node
    pub peer: NodeId,
    /// Our side of the connection
    pub role: Role,
    /// State at the time the summary was taken
    pub state: SessionState,
    /// Message counters
    pub stats: SessionStats,
}

/// Session state machine for a single peer connection.
///
/// Pure: no I/O and no clock. The driver passes wall-clock milliseconds in
/// so outgoing messages can be stamped.
#[derive(Debug, Clone)]
pub struct PeerSession {
    peer: NodeId,
    role: Role,
    state: SessionState,
    stats: SessionStats,
}

impl PeerSession {
    /// Create an idle session with `peer`.
    pub fn new(peer: NodeId, role: Role) -> Self {
        Self { peer, role, state: SessionState::Idle, stats: SessionStats::default() }
    }

    /// Remote node.
    pub fn peer(&self) -> NodeId {
        self.peer
    }

    /// Our side of the connection.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether our ping has been acknowledged.
    pub fn is_acknowledged(&self) -> bool {
        self.state == SessionState::Terminated
    }

    /// Message counters so far.
    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Snapshot for reporting.
    pub fn summary(&self) -> SessionSummary {
        SessionSummary { peer: self.peer, role: self.role, state: self.state, stats: self.stats }
    }

    /// Send the initial ping.
    ///
    /// # Errors
    ///
    /// `SessionError::InvalidState` if the session already started.
    pub fn start(&mut self, now_ms: u64) -> Result<Vec<SessionAction>, SessionError> {
        if self.state != SessionState::Idle {
            return Err(SessionError::InvalidState { state: self.state, operation: "start" });
        }

        self.state = SessionState::AwaitingReply;
        self.stats.pings_sent += 1;
        Ok(vec![SessionAction::Send(Message::ping(now_ms))])
    }

    /// Process a message from the peer.
    ///
    /// Pings are accepted as long as the session is not idle, so a peer that
    /// pings us after we terminated still gets its pong. A pong is accepted
    /// only while awaiting one.
    ///
    /// # Errors
    ///
    /// `SessionError::UnexpectedMessage` for a message the current state does
    /// not accept.
    pub fn handle_message(
        &mut self,
        message: Message,
        now_ms: u64,
    ) -> Result<Vec<SessionAction>, SessionError> {
        match (self.state, message.kind) {
            (SessionState::AwaitingReply | SessionState::Terminated, MessageKind::Ping) => {
                self.stats.pongs_sent += 1;
                Ok(vec![SessionAction::Send(Message::pong(now_ms))])
            },
            (SessionState::AwaitingReply, MessageKind::Pong) => {
                self.state = SessionState::Terminated;
                self.stats.pongs_received += 1;
                Ok(vec![SessionAction::Acknowledged])
            },
            (SessionState::AwaitingReply | SessionState::Terminated, MessageKind::Payload) => {
                self.stats.payloads_received += 1;
                Ok(vec![SessionAction::Deliver(message)])
            },
            (state, kind) => Err(SessionError::UnexpectedMessage { state, kind }),
        }
    }
}
