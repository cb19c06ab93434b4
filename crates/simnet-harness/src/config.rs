//! Harness and node configuration.
//!
//! Defaults carry the canonical demo constants. The binary overrides a few of
//! them from the command line; tests shrink difficulties and durations.

use std::{collections::BTreeSet, time::Duration};

use serde::Serialize;
use simnet_core::{ConfigError, Environment, NodeId, ProducerConfig, ResultSink};

/// Default number of nodes in the demo network.
pub const DEFAULT_NODES: usize = 5;

/// Default deadline for a step.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time non-worker nodes wait before reporting in.
pub const DEFAULT_SIM_DURATION: Duration = Duration::from_secs(5);

/// Default per-subscriber event buffer.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Default depth of each node's control channel.
pub const DEFAULT_CONTROL_CAPACITY: usize = 32;

/// Harness-wide settings.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Nodes to create
    pub nodes: usize,
    /// Deadline for the convergence step
    pub step_timeout: Duration,
    /// Delay before non-worker nodes trigger
    pub sim_duration: Duration,
    /// Per-subscriber event buffer
    pub event_capacity: usize,
    /// Depth of each node's control channel
    pub control_capacity: usize,
    /// Producer settings shared by every node
    pub producer: ProducerConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            nodes: DEFAULT_NODES,
            step_timeout: DEFAULT_STEP_TIMEOUT,
            sim_duration: DEFAULT_SIM_DURATION,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            control_capacity: DEFAULT_CONTROL_CAPACITY,
            producer: ProducerConfig::default(),
        }
    }
}

/// What a node's producer does when it starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodeRole {
    /// Produces jobs from the start, at most this difficulty
    Worker {
        /// Ceiling and initial difficulty
        max_difficulty: u8,
    },
    /// Producer starts at difficulty 0 and waits to be told otherwise
    Idle,
}

impl NodeRole {
    /// Difficulty the node starts with.
    pub fn initial_difficulty(self) -> u8 {
        match self {
            Self::Worker { max_difficulty } => max_difficulty,
            Self::Idle => 0,
        }
    }
}

/// Configuration for one node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Unique identifier
    pub id: NodeId,
    /// Human-readable name for logs
    pub name: String,
    /// Producer role
    pub role: NodeRole,
    /// Producer limits
    pub producer: ProducerConfig,
    /// Where the producer's results go
    pub sink: ResultSink,
}

impl NodeConfig {
    /// Idle node with default producer settings.
    pub fn new(id: NodeId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            role: NodeRole::Idle,
            producer: ProducerConfig::default(),
            sink: ResultSink::NoSink,
        }
    }

    /// Idle node with a random identifier.
    pub fn random<E: Environment>(env: &E, name: impl Into<String>) -> Self {
        Self::new(NodeId::random(env), name)
    }

    /// Set the producer role.
    #[must_use]
    pub fn with_role(mut self, role: NodeRole) -> Self {
        self.role = role;
        self
    }

    /// Set the producer limits.
    #[must_use]
    pub fn with_producer(mut self, producer: ProducerConfig) -> Self {
        self.producer = producer;
        self
    }

    /// Set the result sink.
    #[must_use]
    pub fn with_sink(mut self, sink: ResultSink) -> Self {
        self.sink = sink;
        self
    }

    /// Producer limits with the worker ceiling applied.
    pub fn effective_producer(&self) -> ProducerConfig {
        let mut producer = self.producer.clone();
        if let NodeRole::Worker { max_difficulty } = self.role {
            producer.max_difficulty = max_difficulty;
        }
        producer
    }

    /// Check the configuration is usable.
    ///
    /// # Errors
    ///
    /// - `ConfigError::EmptyName` for a blank name
    /// - `ConfigError::InvalidDifficultyRange` if a worker's ceiling is below
    ///   the producer's minimum submit difficulty
    /// - any error from [`ProducerConfig::validate`]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        self.effective_producer().validate()
    }
}

/// Which node indexes are workers. Everything else is idle.
///
/// Resolved against the node count before any node is created, so a bad
/// index fails the whole setup rather than one node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleAssignment {
    workers: BTreeSet<usize>,
}

impl RoleAssignment {
    /// No workers at all.
    pub fn none() -> Self {
        Self::default()
    }

    /// Exactly one worker, at `index`.
    pub fn single_worker(index: usize) -> Self {
        Self { workers: BTreeSet::from([index]) }
    }

    /// Workers at each of `indexes`.
    pub fn workers(indexes: impl IntoIterator<Item = usize>) -> Self {
        Self { workers: indexes.into_iter().collect() }
    }

    /// Whether `index` is a worker.
    pub fn is_worker(&self, index: usize) -> bool {
        self.workers.contains(&index)
    }

    /// Role for each of `nodes` indexes.
    ///
    /// # Errors
    ///
    /// `ConfigError::RoleIndexOutOfRange` if a worker index is not below
    /// `nodes`.
    pub fn resolve(&self, nodes: usize, max_difficulty: u8) -> Result<Vec<NodeRole>, ConfigError> {
        if let Some(&index) = self.workers.iter().find(|&&index| index >= nodes) {
            return Err(ConfigError::RoleIndexOutOfRange { index, nodes });
        }

        Ok((0..nodes)
            .map(|index| {
                if self.is_worker(index) {
                    NodeRole::Worker { max_difficulty }
                } else {
                    NodeRole::Idle
                }
            })
            .collect())
    }
}
