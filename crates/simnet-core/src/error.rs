//! Error types for the simnet core.
//!
//! Configuration errors are raised before anything runs. Session errors are
//! raised by the per-connection state machine and its async driver; they
//! terminate only the session that produced them.

use std::io;

use simnet_proto::{MessageKind, ProtocolError};
use thiserror::Error;

use crate::{node_id::NodeId, session::SessionState};

/// Errors in node or producer configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Another node already owns this identifier
    #[error("node identifier {0} is already in use")]
    DuplicateId(NodeId),

    /// Node name must not be empty
    #[error("node name must not be empty")]
    EmptyName,

    /// Difficulty bounds are inverted
    #[error("invalid difficulty range: min {min} exceeds max {max}")]
    InvalidDifficultyRange {
        /// Minimum submit difficulty
        min: u8,
        /// Maximum difficulty
        max: u8,
    },

    /// Producer would generate empty puzzles
    #[error("puzzle data size must be non-zero")]
    EmptyPuzzleData,

    /// Role assignment references a node index that does not exist
    #[error("role assignment index {index} out of range for {nodes} nodes")]
    RoleIndexOutOfRange {
        /// Offending index
        index: usize,
        /// Number of nodes in the topology
        nodes: usize,
    },
}

/// Errors raised by a peer session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Invalid state transition attempted
    #[error("invalid state transition: cannot {operation} from {state:?}")]
    InvalidState {
        /// Current state when error occurred
        state: SessionState,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Received a message the current state does not accept
    #[error("unexpected {kind:?} message in state {state:?}")]
    UnexpectedMessage {
        /// Current state when the message arrived
        state: SessionState,
        /// Kind of the unexpected message
        kind: MessageKind,
    },

    /// Malformed frame or message body
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Underlying transport error
    #[error("transport error: {0}")]
    Transport(String),

    /// Session was torn down by its owner before it finished
    #[error("session cancelled")]
    Cancelled,
}

impl SessionError {
    /// Returns true if this error is transient and may succeed on retry.
    ///
    /// Transport failures and cancellation say nothing about the peer.
    /// Protocol violations indicate a broken peer and are never transient.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Cancelled)
    }
}

impl From<ProtocolError> for SessionError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<io::Error> for SessionError {
    fn from(err: io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(SessionError::Transport("reset".into()).is_transient());
        assert!(SessionError::Cancelled.is_transient());
        assert!(!SessionError::Protocol("bad magic".into()).is_transient());
        assert!(
            !SessionError::UnexpectedMessage { state: SessionState::Idle, kind: MessageKind::Pong }
                .is_transient()
        );
    }

    #[test]
    fn protocol_error_converts() {
        let err: SessionError = ProtocolError::InvalidMagic.into();
        assert!(matches!(err, SessionError::Protocol(_)));
    }

    #[test]
    fn io_error_converts() {
        let err: SessionError = io::Error::new(io::ErrorKind::UnexpectedEof, "eof").into();
        assert!(matches!(err, SessionError::Transport(_)));
    }
}
