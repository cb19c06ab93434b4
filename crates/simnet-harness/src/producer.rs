//! Job producer task.
//!
//! Loops until its node stops or it has submitted `max_jobs` jobs: read the
//! requested difficulty, build a random puzzle, search it on the blocking
//! pool under the per-job budget, hand any solution to the sink, pause for
//! `submit_delay`. Difficulty 0 parks the loop until the difficulty changes.
//!
//! The per-job budget is measured on the host's monotonic clock. A blocking
//! search holds back a paused tokio clock, so a budget read from it would
//! never run out.

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use simnet_core::{
    Environment, JobLedger, JobResult, NodeId, ProducerConfig, ProducerReport, ResultSink,
    SearchOutcome, StopReason, puzzle,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Inputs of one producer task.
#[derive(Debug)]
pub struct Producer<E> {
    /// Producing node
    pub node: NodeId,
    /// Randomness for payloads and nonces, clock for budgets
    pub env: E,
    /// Limits
    pub config: ProducerConfig,
    /// Where solutions go
    pub sink: ResultSink,
    /// Requested difficulty, written by the control loop
    pub difficulty: watch::Receiver<u8>,
    /// Submission counter shared with the control loop
    pub jobs: Arc<AtomicUsize>,
    /// Cancelled when the node stops
    pub cancel: CancellationToken,
}

impl<E: Environment> Producer<E> {
    /// Run until cancelled or the job cap is reached.
    pub async fn run(mut self) -> ProducerReport {
        let mut ledger = JobLedger::new(self.config.max_jobs);

        let reason = loop {
            if ledger.is_exhausted() {
                break StopReason::MaxJobs;
            }
            if self.cancel.is_cancelled() {
                break StopReason::Cancelled;
            }

            let difficulty = self.config.effective_difficulty(*self.difficulty.borrow_and_update());
            if difficulty == 0 {
                tracing::trace!(node = %self.node, "producer idle");
                tokio::select! {
                    () = self.cancel.cancelled() => break StopReason::Cancelled,
                    changed = self.difficulty.changed() => {
                        if changed.is_err() {
                            break StopReason::Cancelled;
                        }
                        continue;
                    },
                }
            }

            match self.search(difficulty).await {
                Some(SearchOutcome::Found(job)) => {
                    ledger.record_produced();
                    self.jobs.fetch_add(1, Ordering::Relaxed);

                    let result = JobResult {
                        node: self.node,
                        protocol_id: self.config.protocol_id,
                        difficulty: job.difficulty,
                        data: job.data,
                        nonce: job.nonce,
                        hash: job.hash,
                    };
                    tracing::info!(
                        node = %self.node,
                        difficulty,
                        job = ledger.produced(),
                        "job produced"
                    );
                    self.submit(result);
                },
                Some(SearchOutcome::BudgetExhausted { attempts }) => {
                    ledger.record_abandoned();
                    tracing::warn!(
                        node = %self.node,
                        difficulty,
                        attempts,
                        "job abandoned at budget"
                    );
                    continue;
                },
                Some(SearchOutcome::Idle) => continue,
                Some(SearchOutcome::Interrupted { .. }) | None => break StopReason::Cancelled,
            }

            tokio::select! {
                () = self.cancel.cancelled() => break StopReason::Cancelled,
                () = self.env.sleep(self.config.submit_delay) => {},
            }
        };

        let report = ledger.report(self.node, reason);
        tracing::debug!(
            node = %self.node,
            produced = report.jobs_produced,
            abandoned = report.jobs_abandoned,
            reason = ?report.reason,
            "producer stopped"
        );
        report
    }

    /// Search one random puzzle on the blocking pool.
    ///
    /// `None` if the node was cancelled or the search task died.
    async fn search(&self, difficulty: u8) -> Option<SearchOutcome> {
        let mut data = vec![0u8; self.config.data_size];
        self.env.random_bytes(&mut data);

        let env = BlockingClock(self.env.clone());
        let budget = self.config.max_time_per_job;
        let cancel = self.cancel.clone();
        let task = tokio::task::spawn_blocking(move || {
            puzzle::search_until(&env, data, difficulty, budget, || cancel.is_cancelled())
        });

        match task.await {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                tracing::error!(node = %self.node, error = %err, "search task failed");
                None
            },
        }
    }

    /// Hand a result to the sink without waiting for it.
    fn submit(&self, result: JobResult) {
        if !self.sink.is_enabled() {
            return;
        }
        let sink = self.sink.clone();
        // Fire and forget: a panicking sink only takes down its own task.
        drop(tokio::task::spawn_blocking(move || sink.deliver(&result)));
    }
}

/// Environment for a search on the blocking pool.
///
/// Randomness comes from the node's environment, time from [`Instant`].
#[derive(Clone)]
struct BlockingClock<E>(E);

impl<E: Environment> Environment for BlockingClock<E> {
    type Instant = Instant;

    fn now(&self) -> Self::Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        self.0.sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.0.random_bytes(buffer);
    }

    fn wall_clock_ms(&self) -> u64 {
        self.0.wall_clock_ms()
    }
}
