//! Node control surface.
//!
//! Each started node runs a control loop that owns its command channel.
//! Callers hold a cheap [`NodeHandle`] and issue [`Command`]s; each call
//! carries a oneshot for the reply.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use serde::Serialize;
use simnet_core::NodeId;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::{error::ControlError, topology::NodeState};

/// Command accepted by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Difficulty for the next job; 0 idles the producer
    SetDifficulty(u8),
    /// Current requested difficulty
    Difficulty,
    /// Liveness and counters
    Status,
}

/// Reply to a [`Command`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Command applied
    Ack,
    /// Current requested difficulty
    Difficulty(u8),
    /// Node status
    Status(NodeStatus),
}

/// Snapshot of a node as seen by its control loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    /// Node identifier
    pub id: NodeId,
    /// Lifecycle state
    pub state: NodeState,
    /// Requested difficulty
    pub difficulty: u8,
    /// Jobs the producer has submitted
    pub jobs_produced: usize,
}

pub(crate) struct ControlRequest {
    command: Command,
    reply: oneshot::Sender<Response>,
}

/// Client side of a node's control channel.
#[derive(Debug, Clone)]
pub struct NodeHandle {
    id: NodeId,
    state: watch::Receiver<NodeState>,
    requests: mpsc::Sender<ControlRequest>,
}

impl NodeHandle {
    pub(crate) fn new(
        id: NodeId,
        state: watch::Receiver<NodeState>,
        requests: mpsc::Sender<ControlRequest>,
    ) -> Self {
        Self { id, state, requests }
    }

    /// Node identifier.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> NodeState {
        *self.state.borrow()
    }

    /// Send a command and wait for the reply.
    ///
    /// # Errors
    ///
    /// - `ControlError::NotRunning` if the node is not started or connected
    /// - `ControlError::ControlLoopGone` if the loop exits before replying
    pub async fn call(&self, command: Command) -> Result<Response, ControlError> {
        let state = self.state();
        if !state.is_running() {
            return Err(ControlError::NotRunning { node: self.id, state });
        }

        let (reply, response) = oneshot::channel();
        self.requests
            .send(ControlRequest { command, reply })
            .await
            .map_err(|_| ControlError::ControlLoopGone(self.id))?;

        response.await.map_err(|_| ControlError::ControlLoopGone(self.id))
    }

    /// Set the difficulty for the next job.
    pub async fn set_difficulty(&self, difficulty: u8) -> Result<(), ControlError> {
        self.call(Command::SetDifficulty(difficulty)).await.map(|_| ())
    }

    /// Current requested difficulty.
    pub async fn difficulty(&self) -> Result<u8, ControlError> {
        match self.call(Command::Difficulty).await? {
            Response::Difficulty(difficulty) => Ok(difficulty),
            other => Err(self.mismatch(&other)),
        }
    }

    /// Node status.
    pub async fn status(&self) -> Result<NodeStatus, ControlError> {
        match self.call(Command::Status).await? {
            Response::Status(status) => Ok(status),
            other => Err(self.mismatch(&other)),
        }
    }

    fn mismatch(&self, response: &Response) -> ControlError {
        tracing::error!(node = %self.id, ?response, "control loop replied with the wrong response");
        ControlError::ControlLoopGone(self.id)
    }
}

/// Shared state the control loop reads and writes.
pub(crate) struct ControlState {
    pub id: NodeId,
    pub state: watch::Receiver<NodeState>,
    pub difficulty: Arc<watch::Sender<u8>>,
    pub jobs: Arc<AtomicUsize>,
}

/// Serve commands until the node is cancelled or every handle is gone.
pub(crate) async fn control_loop(
    control: ControlState,
    mut requests: mpsc::Receiver<ControlRequest>,
    cancel: CancellationToken,
) {
    loop {
        let request = tokio::select! {
            () = cancel.cancelled() => break,
            request = requests.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        let response = match request.command {
            Command::SetDifficulty(difficulty) => {
                let previous = control.difficulty.send_replace(difficulty);
                tracing::debug!(node = %control.id, previous, difficulty, "difficulty set");
                Response::Ack
            },
            Command::Difficulty => Response::Difficulty(*control.difficulty.borrow()),
            Command::Status => Response::Status(NodeStatus {
                id: control.id,
                state: *control.state.borrow(),
                difficulty: *control.difficulty.borrow(),
                jobs_produced: control.jobs.load(Ordering::Relaxed),
            }),
        };

        // Caller may have given up; nothing to do about it.
        let _ = request.reply.send(response);
    }

    tracing::trace!(node = %control.id, "control loop exited");
}
