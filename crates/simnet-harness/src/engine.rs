//! Step executor: drives an action and waits for convergence.
//!
//! A [`Step`] bundles three things. The action causes something to happen
//! and runs as its own task. The trigger is a channel on which anyone may
//! name a node that might now satisfy the expectation. The expectation is a
//! fixed target set and a check.
//!
//! The engine never polls. A node is checked only when it is named on the
//! trigger, and it leaves the pending set the first time its check passes.
//! The step succeeds the moment the pending set is empty and fails on the
//! first check error, the first action error, or the deadline, whichever
//! comes first.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    future::Future,
    pin::Pin,
    time::Duration,
};

use async_trait::async_trait;
use simnet_core::{Environment, NodeId};
use tokio::{sync::mpsc, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{ActionError, CheckError, StepError},
    events::NetworkEvent,
    topology::Topology,
};

/// Cancellation signal plus optional deadline.
///
/// Cloning shares the signal. [`StepContext::child`] derives a signal that is
/// cancelled with its parent but can also be cancelled on its own.
#[derive(Debug, Clone, Default)]
pub struct StepContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl StepContext {
    /// Context with no deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Same signal, deadline at most `timeout` from now.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        self.with_deadline(deadline)
    }

    /// Same signal, deadline at most `deadline`.
    ///
    /// An earlier existing deadline is kept.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(self.deadline.map_or(deadline, |existing| existing.min(deadline)));
        self
    }

    /// Derived context, cancelled whenever this one is.
    #[must_use]
    pub fn child(&self) -> Self {
        Self { token: self.token.child_token(), deadline: self.deadline }
    }

    /// Cancel this context and every context derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Underlying cancellation token, for tasks that select on it directly.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Whether the context is cancelled or past its deadline.
    pub fn is_done(&self) -> bool {
        self.token.is_cancelled()
            || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Resolves when the context is cancelled or its deadline passes.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    () = self.token.cancelled() => {},
                    () = tokio::time::sleep_until(deadline) => {},
                }
            },
            None => self.token.cancelled().await,
        }
    }

    /// Sleep for `duration` unless the context finishes first.
    ///
    /// Returns `true` if the full duration elapsed.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            () = self.done() => false,
            () = tokio::time::sleep(duration) => true,
        }
    }
}

/// Future returned by an action.
pub type ActionFuture = Pin<Box<dyn Future<Output = Result<(), ActionError>> + Send>>;

/// The cause of a step. Runs once, as its own task.
pub struct Action(Box<dyn FnOnce(StepContext) -> ActionFuture + Send>);

impl Action {
    /// Wrap an async closure.
    ///
    /// The closure receives a context derived from the step's. Anything it
    /// spawns must stop when that context is done.
    pub fn new<F, Fut>(action: F) -> Self
    where
        F: FnOnce(StepContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), ActionError>> + Send + 'static,
    {
        Self(Box::new(move |ctx| -> ActionFuture { Box::pin(action(ctx)) }))
    }

    /// Action that does nothing.
    pub fn noop() -> Self {
        Self::new(|_| async { Ok(()) })
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Action(..)")
    }
}

/// Predicate deciding whether a node has converged.
#[async_trait]
pub trait Check: Send + Sync {
    /// `Ok(true)` if `node` passes, `Ok(false)` to stay pending.
    ///
    /// An error aborts the step.
    async fn check(&self, node: NodeId) -> Result<bool, CheckError>;
}

struct FnCheck<F>(F);

#[async_trait]
impl<F, Fut> Check for FnCheck<F>
where
    F: Fn(NodeId) -> Fut + Send + Sync,
    Fut: Future<Output = Result<bool, CheckError>> + Send,
{
    async fn check(&self, node: NodeId) -> Result<bool, CheckError> {
        (self.0)(node).await
    }
}

/// Check backed by an async closure.
pub fn check_fn<F, Fut>(check: F) -> impl Check
where
    F: Fn(NodeId) -> Fut + Send + Sync,
    Fut: Future<Output = Result<bool, CheckError>> + Send,
{
    FnCheck(check)
}

/// Target set and check.
pub struct Expectation {
    /// Nodes that must pass. Fixed for the life of the step.
    pub nodes: Vec<NodeId>,
    /// Convergence predicate
    pub check: Box<dyn Check>,
}

impl Expectation {
    /// Expectation over `nodes`.
    pub fn new(nodes: impl IntoIterator<Item = NodeId>, check: impl Check + 'static) -> Self {
        Self { nodes: nodes.into_iter().collect(), check: Box::new(check) }
    }
}

impl fmt::Debug for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expectation").field("nodes", &self.nodes).finish_non_exhaustive()
    }
}

/// One-shot unit of work for the engine.
#[derive(Debug)]
pub struct Step {
    /// The cause
    pub action: Action,
    /// Wakeups naming nodes to check; duplicates and any order are fine
    pub trigger: mpsc::Receiver<NodeId>,
    /// The proof
    pub expect: Expectation,
}

/// Outcome of a step.
#[derive(Debug, Clone)]
pub struct StepResult {
    /// When the step began
    pub started_at: Instant,
    /// When the step ended
    pub finished_at: Instant,
    /// `None` on success
    pub error: Option<StepError>,
    /// Time after start at which each target passed
    pub passes: BTreeMap<NodeId, Duration>,
    /// Network events observed while the step ran
    pub events: Vec<NetworkEvent>,
    /// Events the step's subscription had to drop
    pub dropped_events: u64,
}

impl StepResult {
    /// Whether every target passed.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Wall time the step took.
    pub fn elapsed(&self) -> Duration {
        self.finished_at.saturating_duration_since(self.started_at)
    }
}

/// Runs steps against a topology.
#[derive(Debug)]
pub struct Simulation<'a, E: Environment> {
    topology: &'a Topology<E>,
}

impl<'a, E: Environment> Simulation<'a, E> {
    /// Engine over `topology`.
    pub fn new(topology: &'a Topology<E>) -> Self {
        Self { topology }
    }

    /// Run `step` until it converges, fails, or `ctx` is done.
    pub async fn run(&self, ctx: &StepContext, step: Step) -> StepResult {
        let started_at = Instant::now();
        let (mut events, _subscription) = self.topology.events().subscribe();
        let Step { action, mut trigger, expect } = step;

        let mut result = StepResult {
            started_at,
            finished_at: started_at,
            error: None,
            passes: BTreeMap::new(),
            events: Vec::new(),
            dropped_events: 0,
        };

        if let Some(&unknown) = expect.nodes.iter().find(|id| !self.topology.contains(**id)) {
            result.error = Some(StepError::UnknownTarget(unknown));
            result.finished_at = Instant::now();
            return result;
        }

        let mut pending: BTreeSet<NodeId> = expect.nodes.iter().copied().collect();
        tracing::debug!(targets = pending.len(), "step started");

        let action_ctx = ctx.child();
        let mut action_task = tokio::spawn((action.0)(action_ctx.clone()));
        let mut action_running = true;
        let mut trigger_open = true;

        let error = loop {
            if pending.is_empty() {
                break None;
            }

            tokio::select! {
                biased;

                () = ctx.done() => {
                    break Some(StepError::Timeout { pending: pending.iter().copied().collect() });
                },

                joined = &mut action_task, if action_running => {
                    action_running = false;
                    match joined {
                        Ok(Ok(())) => tracing::debug!("action finished"),
                        Ok(Err(err)) => break Some(StepError::Action(err)),
                        Err(err) => {
                            let panicked = ActionError::Panicked(err.to_string());
                            break Some(StepError::Action(panicked));
                        },
                    }
                },

                woken = trigger.recv(), if trigger_open => {
                    let Some(node) = woken else {
                        tracing::debug!("trigger closed, waiting for deadline");
                        trigger_open = false;
                        continue;
                    };
                    if !pending.contains(&node) {
                        tracing::trace!(%node, "ignoring trigger for settled node");
                        continue;
                    }

                    let verdict = tokio::select! {
                        biased;
                        () = ctx.done() => None,
                        verdict = expect.check.check(node) => Some(verdict),
                    };

                    match verdict {
                        None => {
                            let pending = pending.iter().copied().collect();
                            break Some(StepError::Timeout { pending });
                        },
                        Some(Ok(true)) => {
                            pending.remove(&node);
                            result.passes.insert(node, started_at.elapsed());
                            tracing::debug!(%node, remaining = pending.len(), "node passed");
                        },
                        Some(Ok(false)) => tracing::trace!(%node, "node not ready"),
                        Some(Err(source)) => break Some(StepError::Expectation { node, source }),
                    }
                },

                Some(event) = events.recv() => result.events.push(event),
            }
        };

        action_ctx.cancel();
        if action_running {
            action_task.abort();
        }

        while let Some(event) = events.try_recv() {
            result.events.push(event);
        }
        result.dropped_events = events.dropped();
        result.finished_at = Instant::now();

        match &error {
            None => tracing::info!(elapsed = ?result.elapsed(), "step converged"),
            Some(err) => tracing::warn!(error = %err, "step failed"),
        }
        result.error = error;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn context_is_done_at_deadline() {
        let ctx = StepContext::new().with_timeout(Duration::from_millis(100));
        assert!(!ctx.is_done());

        tokio::time::advance(Duration::from_millis(99)).await;
        assert!(!ctx.is_done());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(ctx.is_done());
        ctx.done().await;
    }

    #[tokio::test]
    async fn cancelling_parent_finishes_child() {
        let parent = StepContext::new();
        let child = parent.child();
        let sibling = parent.child();

        child.cancel();
        assert!(child.is_done());
        assert!(!parent.is_done());
        assert!(!sibling.is_done());

        parent.cancel();
        assert!(sibling.is_done());
        assert!(!sibling.sleep(Duration::from_secs(60)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn earlier_deadline_wins() {
        let early = Instant::now() + Duration::from_millis(10);
        let late = Instant::now() + Duration::from_millis(500);

        let ctx = StepContext::new().with_deadline(early).with_deadline(late);
        assert_eq!(ctx.deadline(), Some(early));

        let ctx = StepContext::new().with_deadline(late).with_deadline(early);
        assert_eq!(ctx.deadline(), Some(early));
        assert_eq!(ctx.child().deadline(), Some(early));
    }
}
