//! Job producer configuration, accounting and result delivery.
//!
//! The async loop that drives the producer lives in the harness. This module
//! holds everything that loop decides with: difficulty clamping, the job cap,
//! the final report, and the optional result sink.

use std::{fmt, sync::Arc, time::Duration};

use serde::Serialize;

use crate::{error::ConfigError, node_id::NodeId, puzzle::NONCE_LEN};

/// Default cap on jobs a producer submits over its lifetime.
pub const DEFAULT_MAX_JOBS: usize = 100;

/// Default per-job search budget.
pub const DEFAULT_MAX_TIME_PER_JOB: Duration = Duration::from_secs(10);

/// Default pause between submissions.
pub const DEFAULT_SUBMIT_DELAY: Duration = Duration::from_millis(100);

/// Default puzzle payload size in bytes.
pub const DEFAULT_DATA_SIZE: usize = 32;

/// Default lowest difficulty a worker submits at.
pub const DEFAULT_MIN_SUBMIT_DIFFICULTY: u8 = 8;

/// Default highest difficulty a worker submits at.
pub const DEFAULT_MAX_DIFFICULTY: u8 = 24;

/// Job producer configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerConfig {
    /// Total jobs submitted before the producer stops
    pub max_jobs: usize,
    /// Search budget for a single job
    pub max_time_per_job: Duration,
    /// Pause after each submission
    pub submit_delay: Duration,
    /// Puzzle payload size in bytes
    pub data_size: usize,
    /// Lower clamp for non-zero difficulties
    pub min_submit_difficulty: u8,
    /// Upper clamp for non-zero difficulties
    pub max_difficulty: u8,
    /// Protocol identifier reported with each result
    pub protocol_id: u32,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            max_jobs: DEFAULT_MAX_JOBS,
            max_time_per_job: DEFAULT_MAX_TIME_PER_JOB,
            submit_delay: DEFAULT_SUBMIT_DELAY,
            data_size: DEFAULT_DATA_SIZE,
            min_submit_difficulty: DEFAULT_MIN_SUBMIT_DIFFICULTY,
            max_difficulty: DEFAULT_MAX_DIFFICULTY,
            protocol_id: 0,
        }
    }
}

impl ProducerConfig {
    /// Check the configuration is usable.
    ///
    /// # Errors
    ///
    /// - `ConfigError::InvalidDifficultyRange` if min exceeds max
    /// - `ConfigError::EmptyPuzzleData` if `data_size` is zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_submit_difficulty > self.max_difficulty {
            return Err(ConfigError::InvalidDifficultyRange {
                min: self.min_submit_difficulty,
                max: self.max_difficulty,
            });
        }
        if self.data_size == 0 {
            return Err(ConfigError::EmptyPuzzleData);
        }
        Ok(())
    }

    /// Difficulty a job is actually searched at.
    ///
    /// Zero stays zero (idle). Anything else is clamped into
    /// `[min_submit_difficulty, max_difficulty]`.
    pub fn effective_difficulty(&self, requested: u8) -> u8 {
        if requested == 0 {
            return 0;
        }
        requested.max(self.min_submit_difficulty).min(self.max_difficulty)
    }
}

/// A solved job as handed to the result sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobResult {
    /// Producing node
    pub node: NodeId,
    /// Protocol the job was produced for
    pub protocol_id: u32,
    /// Difficulty the job was solved at
    pub difficulty: u8,
    /// Puzzle payload
    pub data: Vec<u8>,
    /// Winning nonce
    pub nonce: [u8; NONCE_LEN],
    /// `SHA-256(data || nonce)`
    pub hash: [u8; 32],
}

impl fmt::Display for JobResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{:x} : {}@{}|{} => {}",
            self.node,
            self.protocol_id,
            hex::encode(&self.data),
            self.difficulty,
            hex::encode(self.nonce),
            hex::encode(self.hash),
        )
    }
}

/// Handler invoked for each solved job.
pub type SinkFn = Arc<dyn Fn(&JobResult) + Send + Sync>;

/// Where solved jobs go. Chosen once at construction.
#[derive(Clone, Default)]
pub enum ResultSink {
    /// Results are counted and discarded
    #[default]
    NoSink,
    /// Results are handed to an external handler
    Sink(SinkFn),
}

impl ResultSink {
    /// Sink backed by a closure.
    pub fn from_fn(handler: impl Fn(&JobResult) + Send + Sync + 'static) -> Self {
        Self::Sink(Arc::new(handler))
    }

    /// Whether results leave the producer.
    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Sink(_))
    }

    /// Hand a result to the handler, if any.
    ///
    /// Synchronous. The harness calls this from the blocking pool so a slow
    /// handler never stalls the producer.
    pub fn deliver(&self, result: &JobResult) {
        match self {
            Self::NoSink => {},
            Self::Sink(handler) => handler(result),
        }
    }
}

impl fmt::Debug for ResultSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSink => f.write_str("NoSink"),
            Self::Sink(_) => f.write_str("Sink(..)"),
        }
    }
}

/// Job accounting for one producer.
#[derive(Debug, Clone)]
pub struct JobLedger {
    max_jobs: usize,
    produced: usize,
    abandoned: usize,
}

impl JobLedger {
    /// Ledger capped at `max_jobs` submissions.
    pub fn new(max_jobs: usize) -> Self {
        Self { max_jobs, produced: 0, abandoned: 0 }
    }

    /// Whether the cap has been reached.
    pub fn is_exhausted(&self) -> bool {
        self.produced >= self.max_jobs
    }

    /// Record a submission. Returns `false`, recording nothing, once the
    /// cap has been reached.
    pub fn record_produced(&mut self) -> bool {
        if self.is_exhausted() {
            return false;
        }
        self.produced += 1;
        true
    }

    /// Record a search that ran out of budget.
    pub fn record_abandoned(&mut self) {
        self.abandoned += 1;
    }

    /// Jobs submitted so far.
    pub fn produced(&self) -> usize {
        self.produced
    }

    /// Searches abandoned so far.
    pub fn abandoned(&self) -> usize {
        self.abandoned
    }

    /// Submissions left before the cap.
    pub fn remaining(&self) -> usize {
        self.max_jobs.saturating_sub(self.produced)
    }

    /// Final report for `node`.
    pub fn report(&self, node: NodeId, reason: StopReason) -> ProducerReport {
        ProducerReport {
            node,
            jobs_produced: self.produced,
            jobs_abandoned: self.abandoned,
            reason,
        }
    }
}

/// Why a producer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    /// Submitted `max_jobs` jobs
    MaxJobs,
    /// Node stopped or the harness shut down
    Cancelled,
}

/// Final producer accounting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProducerReport {
    /// Producing node
    pub node: NodeId,
    /// Jobs submitted
    pub jobs_produced: usize,
    /// Searches that ran out of budget
    pub jobs_abandoned: usize,
    /// Why the producer stopped
    pub reason: StopReason,
}
