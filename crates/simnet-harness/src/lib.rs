//! Scripted convergence harness for peer-to-peer wire protocols.
//!
//! Builds a simulated network of nodes, drives an asynchronous action
//! against a subset of them, and asserts under a deadline that every targeted
//! node eventually reaches an expected condition.
//!
//! # Layout
//!
//! - [`topology`]: nodes, their lifecycle, and pairwise connections
//! - [`events`]: bounded publish/subscribe of lifecycle and message events
//! - [`session`]: per-connection session runtime over any async stream
//! - [`producer`]: budget-bounded job producer task
//! - [`control`]: per-node command channel
//! - [`engine`]: the step executor
//! - [`scenario`]: the star network demo the binary runs
//!
//! State machines live in `simnet-core`; this crate owns every task, channel
//! and socket.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod events;
pub mod producer;
pub mod scenario;
pub mod session;
pub mod sim_env;
pub mod system_env;
pub mod topology;
pub mod wire;

pub use config::{HarnessConfig, NodeConfig, NodeRole, RoleAssignment};
pub use control::{Command, NodeHandle, NodeStatus, Response};
pub use engine::{
    Action, Check, Expectation, Simulation, Step, StepContext, StepResult, check_fn,
};
pub use error::{ActionError, CheckError, ConnectError, ControlError, StepError, TopologyError};
pub use events::{EventBus, EventKind, EventStream, NetworkEvent, SubscriptionHandle};
pub use session::{ConnectionReport, SessionContext, run_session};
pub use sim_env::SimEnv;
pub use system_env::SystemEnv;
pub use topology::{Link, NodeState, Topology, TopologySnapshot};
