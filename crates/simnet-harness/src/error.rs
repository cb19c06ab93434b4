//! Error types for the harness.
//!
//! Topology and connect errors come back from the methods that build a
//! network. Control errors come back from node calls. Only [`StepError`]
//! reaches the caller of a step; everything else is logged at the boundary
//! that owns it.

use simnet_core::{ConfigError, NodeId};
use thiserror::Error;

use crate::topology::{Link, NodeState};

/// Errors from node lifecycle operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    /// No node with this identifier
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    /// Lifecycle operation not allowed from the node's current state
    #[error("invalid transition: cannot {operation} node {node} from {state:?}")]
    InvalidTransition {
        /// Node the operation targeted
        node: NodeId,
        /// State the node was in
        state: NodeState,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// No connection between these nodes, or its report was already taken
    #[error("no pending connection {0}")]
    UnknownConnection(Link),

    /// The connection owner task panicked or was aborted
    #[error("connection task failed: {0}")]
    ConnectionTask(String),

    /// Node configuration was rejected
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Connecting two nodes failed
    #[error(transparent)]
    Connect(#[from] ConnectError),
}

/// Errors from [`Topology::connect`](crate::Topology::connect).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// No node with this identifier
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    /// Endpoint is not running
    #[error("node {node} is {state:?}, not started")]
    NotStarted {
        /// Offending endpoint
        node: NodeId,
        /// Its current state
        state: NodeState,
    },

    /// Both endpoints are the same node
    #[error("node {0} cannot connect to itself")]
    SelfConnection(NodeId),

    /// The pair is already connected
    #[error("nodes already connected: {0}")]
    AlreadyConnected(Link),
}

/// Errors from [`NodeHandle::call`](crate::NodeHandle::call).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    /// Node is not accepting commands in its current state
    #[error("node {node} is {state:?}")]
    NotRunning {
        /// Target node
        node: NodeId,
        /// Its current state
        state: NodeState,
    },

    /// Control loop exited before answering
    #[error("control loop for node {0} is gone")]
    ControlLoopGone(NodeId),
}

/// Error returned by a step action.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// A node call failed
    #[error(transparent)]
    Control(#[from] ControlError),

    /// The action task panicked
    #[error("action panicked: {0}")]
    Panicked(String),

    /// Any other failure reported by the action
    #[error("{0}")]
    Failed(String),
}

/// Error returned by an expectation check.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckError {
    /// A node call failed
    #[error(transparent)]
    Control(#[from] ControlError),

    /// Any other failure reported by the check
    #[error("{0}")]
    Failed(String),
}

/// Why a step failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StepError {
    /// A target is not a member of the topology
    #[error("expectation targets unknown node {0}")]
    UnknownTarget(NodeId),

    /// A check returned an error; the step aborts at once
    #[error("check failed for node {node}: {source}")]
    Expectation {
        /// Node being checked
        node: NodeId,
        /// What the check reported
        source: CheckError,
    },

    /// The action failed before every target passed
    #[error("action failed: {0}")]
    Action(#[source] ActionError),

    /// Deadline or cancellation reached before every target passed
    #[error("step timed out with {} node(s) pending: {pending:?}", pending.len())]
    Timeout {
        /// Targets that had not passed, in identifier order
        pending: Vec<NodeId>,
    },
}

impl StepError {
    /// Targets still pending when the step gave up, if it timed out.
    pub fn pending(&self) -> Option<&[NodeId]> {
        match self {
            Self::Timeout { pending } => Some(pending),
            _ => None,
        }
    }
}
