//! Sans-IO core of the simnet peer-to-peer test harness.
//!
//! Everything in this crate is pure logic: no sockets, no spawned tasks. The
//! async harness (`simnet-harness`) feeds time and bytes in and executes the
//! actions that come out.
//!
//! # Components
//!
//! - [`session::PeerSession`]: per-connection ping/pong state machine
//! - [`barrier::CompletionBarrier`]: shared countdown gating session shutdown
//! - [`puzzle`]: budget-bounded nonce search over SHA-256
//! - [`producer`]: job producer configuration, ledger and result sink
//! - [`env::Environment`]: time and randomness abstraction

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod barrier;
pub mod env;
pub mod error;
mod node_id;
pub mod producer;
pub mod puzzle;
pub mod session;

pub use barrier::CompletionBarrier;
pub use env::Environment;
pub use error::{ConfigError, SessionError};
pub use node_id::NodeId;
pub use producer::{JobLedger, JobResult, ProducerConfig, ProducerReport, ResultSink, StopReason};
pub use puzzle::{Job, SearchOutcome};
pub use session::{PeerSession, Role, SessionAction, SessionState, SessionStats, SessionSummary};
