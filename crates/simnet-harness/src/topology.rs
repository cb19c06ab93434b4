//! Simulated network: nodes, their lifecycle, and pairwise connections.
//!
//! The topology is the single writer of every node's state. Started nodes
//! run a control loop and a job producer; each connection runs both of its
//! sessions over an in-memory duplex stream. Every successful transition is
//! published on the event bus.
//!
//! # Node lifecycle
//!
//! ```text
//! ┌─────────┐  start  ┌─────────┐  connect  ┌───────────┐
//! │ Created │────────>│ Started │──────────>│ Connected │
//! └─────────┘         └─────────┘           └───────────┘
//!      │                   │ stop                 │ stop
//!      │ stop              ↓                      │
//!      │              ┌─────────┐                 │
//!      └─────────────>│ Stopped │<────────────────┘
//!                     └─────────┘
//! ```

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use serde::Serialize;
use simnet_core::{
    CompletionBarrier, ConfigError, Environment, NodeId, PeerSession, ProducerReport, Role,
};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::{DEFAULT_CONTROL_CAPACITY, DEFAULT_EVENT_CAPACITY, NodeConfig, NodeRole},
    control::{self, ControlRequest, ControlState, NodeHandle},
    error::{ConnectError, TopologyError},
    events::{EventBus, EventKind},
    producer::Producer,
    session::{self, ConnectionReport, SessionContext},
};

/// Buffer size of each in-memory connection, per direction.
const DUPLEX_BUFFER: usize = 64 * 1024;

/// Sessions per connection, and so the barrier's initial count.
const SESSIONS_PER_CONNECTION: usize = 2;

/// Lifecycle state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NodeState {
    /// Configured, not running
    Created,
    /// Running, no connections yet
    Started,
    /// Running with at least one connection
    Connected,
    /// Stopped; terminal
    Stopped,
}

impl NodeState {
    /// Whether the node accepts commands and connections.
    pub fn is_running(self) -> bool {
        matches!(self, Self::Started | Self::Connected)
    }
}

/// Unordered pair of node identifiers.
///
/// `Link::new(a, b) == Link::new(b, a)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Link {
    low: NodeId,
    high: NodeId,
}

impl Link {
    /// Normalized pair.
    pub fn new(a: NodeId, b: NodeId) -> Self {
        if a <= b { Self { low: a, high: b } } else { Self { low: b, high: a } }
    }

    /// Both endpoints, lower identifier first.
    pub fn endpoints(&self) -> (NodeId, NodeId) {
        (self.low, self.high)
    }

    /// Whether `node` is an endpoint.
    pub fn contains(&self, node: NodeId) -> bool {
        self.low == node || self.high == node
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<->{}", self.low, self.high)
    }
}

struct Node {
    config: NodeConfig,
    state: watch::Sender<NodeState>,
    difficulty: Arc<watch::Sender<u8>>,
    jobs: Arc<AtomicUsize>,
    requests: mpsc::Sender<ControlRequest>,
    pending_requests: Option<mpsc::Receiver<ControlRequest>>,
    cancel: CancellationToken,
    control: Option<JoinHandle<()>>,
    producer: Option<JoinHandle<ProducerReport>>,
}

impl Node {
    fn state(&self) -> NodeState {
        *self.state.borrow()
    }
}

struct Connection {
    initiator: NodeId,
    barrier: Arc<CompletionBarrier>,
    cancel: CancellationToken,
    task: Option<JoinHandle<ConnectionReport>>,
}

/// Serializable diagnostic view of a topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopologySnapshot {
    /// Nodes in creation order
    pub nodes: Vec<NodeSnapshot>,
    /// Connections in link order
    pub connections: Vec<ConnectionSnapshot>,
    /// Live event subscribers
    pub subscribers: usize,
    /// Events dropped across all subscribers
    pub dropped_events: u64,
}

/// One node in a [`TopologySnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSnapshot {
    /// Identifier
    pub id: NodeId,
    /// Name
    pub name: String,
    /// Producer role
    pub role: NodeRole,
    /// Lifecycle state
    pub state: NodeState,
    /// Requested difficulty
    pub difficulty: u8,
    /// Jobs submitted
    pub jobs_produced: usize,
}

/// One connection in a [`TopologySnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionSnapshot {
    /// Endpoints
    pub link: Link,
    /// Dialing side
    pub initiator: NodeId,
    /// Sessions that have not been acknowledged yet
    pub barrier_remaining: usize,
    /// Whether both sessions have returned
    pub finished: bool,
}

/// A simulated network.
///
/// Must be used inside a tokio runtime: starting nodes and connecting them
/// spawns tasks. Dropping the topology cancels everything it spawned.
pub struct Topology<E: Environment> {
    env: E,
    bus: EventBus,
    control_capacity: usize,
    nodes: HashMap<NodeId, Node>,
    order: Vec<NodeId>,
    connections: BTreeMap<Link, Connection>,
    root: CancellationToken,
}

impl<E: Environment> fmt::Debug for Topology<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topology")
            .field("nodes", &self.order.len())
            .field("connections", &self.connections.len())
            .finish_non_exhaustive()
    }
}

impl<E: Environment> Topology<E> {
    /// Empty topology with default capacities.
    pub fn new(env: E) -> Self {
        Self::with_capacities(env, DEFAULT_EVENT_CAPACITY, DEFAULT_CONTROL_CAPACITY)
    }

    /// Empty topology with explicit event and control channel capacities.
    pub fn with_capacities(env: E, event_capacity: usize, control_capacity: usize) -> Self {
        Self {
            env,
            bus: EventBus::with_capacity(event_capacity),
            control_capacity: control_capacity.max(1),
            nodes: HashMap::new(),
            order: Vec::new(),
            connections: BTreeMap::new(),
            root: CancellationToken::new(),
        }
    }

    /// The environment nodes draw time and randomness from.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// The topology's event bus.
    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    /// Whether `id` is a member.
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Node identifiers in creation order.
    pub fn node_ids(&self) -> &[NodeId] {
        &self.order
    }

    /// Current state of `id`.
    pub fn state(&self, id: NodeId) -> Option<NodeState> {
        self.nodes.get(&id).map(Node::state)
    }

    /// Control handle for `id`.
    ///
    /// # Errors
    ///
    /// `TopologyError::UnknownNode` if `id` is not a member.
    pub fn node(&self, id: NodeId) -> Result<NodeHandle, TopologyError> {
        let node = self.nodes.get(&id).ok_or(TopologyError::UnknownNode(id))?;
        Ok(NodeHandle::new(id, node.state.subscribe(), node.requests.clone()))
    }

    /// Add a node in the `Created` state.
    ///
    /// # Errors
    ///
    /// - `ConfigError::DuplicateId` if the identifier is taken
    /// - any error from [`NodeConfig::validate`]
    pub fn new_node(&mut self, config: NodeConfig) -> Result<NodeId, ConfigError> {
        config.validate()?;
        let id = config.id;
        if self.nodes.contains_key(&id) {
            return Err(ConfigError::DuplicateId(id));
        }

        let (state, _) = watch::channel(NodeState::Created);
        let (difficulty, _) = watch::channel(config.role.initial_difficulty());
        let (requests, pending_requests) = mpsc::channel(self.control_capacity);

        tracing::debug!(node = %id, name = %config.name, role = ?config.role, "node created");

        self.nodes.insert(
            id,
            Node {
                config,
                state,
                difficulty: Arc::new(difficulty),
                jobs: Arc::new(AtomicUsize::new(0)),
                requests,
                pending_requests: Some(pending_requests),
                cancel: self.root.child_token(),
                control: None,
                producer: None,
            },
        );
        self.order.push(id);
        Ok(id)
    }

    /// Start a created node: spawn its control loop and producer.
    ///
    /// # Errors
    ///
    /// - `TopologyError::UnknownNode` if `id` is not a member
    /// - `TopologyError::InvalidTransition` unless the node is `Created`
    pub fn start(&mut self, id: NodeId) -> Result<(), TopologyError> {
        let env = self.env.clone();
        let node = self.nodes.get_mut(&id).ok_or(TopologyError::UnknownNode(id))?;
        let state = node.state();
        let requests = match (state, node.pending_requests.take()) {
            (NodeState::Created, Some(requests)) => requests,
            _ => {
                return Err(TopologyError::InvalidTransition {
                    node: id,
                    state,
                    operation: "start",
                });
            },
        };

        let control = ControlState {
            id,
            state: node.state.subscribe(),
            difficulty: Arc::clone(&node.difficulty),
            jobs: Arc::clone(&node.jobs),
        };
        node.control = Some(tokio::spawn(control::control_loop(
            control,
            requests,
            node.cancel.clone(),
        )));

        let producer = Producer {
            node: id,
            env,
            config: node.config.effective_producer(),
            sink: node.config.sink.clone(),
            difficulty: node.difficulty.subscribe(),
            jobs: Arc::clone(&node.jobs),
            cancel: node.cancel.clone(),
        };
        node.producer = Some(tokio::spawn(producer.run()));

        node.state.send_replace(NodeState::Started);
        tracing::info!(node = %id, name = %node.config.name, "node up");
        self.bus.publish(EventKind::NodeUp, id, None);
        Ok(())
    }

    /// Start every created node, in creation order.
    ///
    /// # Errors
    ///
    /// Stops at the first node that fails to start.
    pub fn start_all(&mut self) -> Result<(), TopologyError> {
        let created: Vec<NodeId> = self
            .order
            .iter()
            .copied()
            .filter(|id| self.state(*id) == Some(NodeState::Created))
            .collect();
        for id in created {
            self.start(id)?;
        }
        Ok(())
    }

    /// Connect two running nodes and start a session on each side.
    ///
    /// `a` dials, `b` accepts.
    ///
    /// # Errors
    ///
    /// - `ConnectError::SelfConnection` if `a == b`
    /// - `ConnectError::UnknownNode` if either is not a member
    /// - `ConnectError::NotStarted` if either is not running
    /// - `ConnectError::AlreadyConnected` if the pair is connected
    pub fn connect(&mut self, a: NodeId, b: NodeId) -> Result<(), ConnectError> {
        if a == b {
            return Err(ConnectError::SelfConnection(a));
        }
        for id in [a, b] {
            let state = self.state(id).ok_or(ConnectError::UnknownNode(id))?;
            if !state.is_running() {
                return Err(ConnectError::NotStarted { node: id, state });
            }
        }
        let link = Link::new(a, b);
        if self.connections.contains_key(&link) {
            return Err(ConnectError::AlreadyConnected(link));
        }

        let barrier = Arc::new(CompletionBarrier::new(SESSIONS_PER_CONNECTION));
        let cancel = self.root.child_token();
        let (left, right) = tokio::io::duplex(DUPLEX_BUFFER);

        let context = |node| SessionContext {
            node,
            env: self.env.clone(),
            bus: self.bus.clone(),
            barrier: Arc::clone(&barrier),
            cancel: cancel.clone(),
        };
        let initiator = (left, PeerSession::new(b, Role::Initiator), context(a));
        let responder = (right, PeerSession::new(a, Role::Responder), context(b));
        let bus = self.bus.clone();

        let task = tokio::spawn(async move {
            let report = session::run_connection(link, initiator, responder).await;
            if !report.is_success() {
                bus.publish(EventKind::Disconnected, a, Some(b));
                bus.publish(EventKind::Disconnected, b, Some(a));
            }
            report
        });

        self.connections
            .insert(link, Connection { initiator: a, barrier, cancel, task: Some(task) });

        for (id, peer) in [(a, b), (b, a)] {
            if let Some(node) = self.nodes.get(&id) {
                node.state.send_if_modified(|state| {
                    let upgrade = *state == NodeState::Started;
                    if upgrade {
                        *state = NodeState::Connected;
                    }
                    upgrade
                });
            }
            self.bus.publish(EventKind::Connected, id, Some(peer));
        }

        tracing::info!(%link, "nodes connected");
        Ok(())
    }

    /// Whether `a` and `b` are connected.
    pub fn is_connected(&self, a: NodeId, b: NodeId) -> bool {
        self.connections.contains_key(&Link::new(a, b))
    }

    /// Barrier shared by the two sessions of a connection.
    pub fn barrier(&self, a: NodeId, b: NodeId) -> Option<Arc<CompletionBarrier>> {
        self.connections.get(&Link::new(a, b)).map(|conn| Arc::clone(&conn.barrier))
    }

    /// Wait for both sessions of a connection and take their report.
    ///
    /// # Errors
    ///
    /// - `TopologyError::UnknownConnection` if the pair was never connected
    ///   or the report was already taken
    /// - `TopologyError::ConnectionTask` if the owner task panicked
    pub async fn join_connection(
        &mut self,
        a: NodeId,
        b: NodeId,
    ) -> Result<ConnectionReport, TopologyError> {
        let link = Link::new(a, b);
        let task = self
            .connections
            .get_mut(&link)
            .and_then(|conn| conn.task.take())
            .ok_or(TopologyError::UnknownConnection(link))?;

        task.await.map_err(|err| TopologyError::ConnectionTask(err.to_string()))
    }

    /// Stop a node.
    ///
    /// Cancels its control loop, its producer, and the sessions of every
    /// connection it participates in. Stopping is terminal.
    ///
    /// # Errors
    ///
    /// - `TopologyError::UnknownNode` if `id` is not a member
    /// - `TopologyError::InvalidTransition` if the node is already stopped
    pub fn stop(&mut self, id: NodeId) -> Result<(), TopologyError> {
        let node = self.nodes.get_mut(&id).ok_or(TopologyError::UnknownNode(id))?;
        let state = node.state();
        if state == NodeState::Stopped {
            return Err(TopologyError::InvalidTransition { node: id, state, operation: "stop" });
        }

        node.cancel.cancel();
        node.pending_requests = None;
        node.state.send_replace(NodeState::Stopped);

        for (link, conn) in &self.connections {
            if link.contains(id) && !conn.cancel.is_cancelled() {
                tracing::debug!(%link, "releasing connection of stopped node");
                conn.cancel.cancel();
            }
        }

        tracing::info!(node = %id, "node down");
        self.bus.publish(EventKind::NodeDown, id, None);
        Ok(())
    }

    /// Stop every node that is not already stopped.
    pub fn stop_all(&mut self) {
        let running: Vec<NodeId> = self
            .order
            .iter()
            .copied()
            .filter(|id| self.state(*id) != Some(NodeState::Stopped))
            .collect();
        for id in running {
            if let Err(err) = self.stop(id) {
                tracing::warn!(node = %id, error = %err, "stop failed");
            }
        }
    }

    /// Wait for a node's producer to finish and take its report.
    ///
    /// `None` if the node never started, or the report was already taken.
    pub async fn join_producer(&mut self, id: NodeId) -> Option<ProducerReport> {
        let task = self.nodes.get_mut(&id)?.producer.take()?;
        match task.await {
            Ok(report) => Some(report),
            Err(err) => {
                tracing::error!(node = %id, error = %err, "producer task failed");
                None
            },
        }
    }

    /// Stop everything and wait for every task to exit.
    ///
    /// Returns the producer reports in node creation order.
    pub async fn shutdown(&mut self) -> Vec<ProducerReport> {
        self.stop_all();
        self.root.cancel();

        let mut reports = Vec::new();
        for id in self.order.clone() {
            if let Some(report) = self.join_producer(id).await {
                reports.push(report);
            }
            if let Some(control) = self.nodes.get_mut(&id).and_then(|node| node.control.take())
                && let Err(err) = control.await
            {
                tracing::error!(node = %id, error = %err, "control task failed");
            }
        }

        for (link, conn) in &mut self.connections {
            if let Some(task) = conn.task.take() {
                match task.await {
                    Ok(report) => {
                        tracing::debug!(%link, success = report.is_success(), "connection closed");
                    },
                    Err(err) => tracing::error!(%link, error = %err, "connection task failed"),
                }
            }
        }

        tracing::info!(nodes = self.order.len(), "topology shut down");
        reports
    }

    /// Serializable view of nodes, connections and the event bus.
    pub fn snapshot(&self) -> TopologySnapshot {
        let nodes = self
            .order
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .map(|node| NodeSnapshot {
                id: node.config.id,
                name: node.config.name.clone(),
                role: node.config.role,
                state: node.state(),
                difficulty: *node.difficulty.borrow(),
                jobs_produced: node.jobs.load(Ordering::Relaxed),
            })
            .collect();

        let connections = self
            .connections
            .iter()
            .map(|(link, conn)| ConnectionSnapshot {
                link: *link,
                initiator: conn.initiator,
                barrier_remaining: conn.barrier.remaining(),
                finished: conn.task.as_ref().is_none_or(JoinHandle::is_finished),
            })
            .collect();

        TopologySnapshot {
            nodes,
            connections,
            subscribers: self.bus.subscriber_count(),
            dropped_events: self.bus.dropped_total(),
        }
    }
}

impl<E: Environment> Drop for Topology<E> {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_is_unordered() {
        let a = NodeId::from_bytes([1; 32]);
        let b = NodeId::from_bytes([2; 32]);

        assert_eq!(Link::new(a, b), Link::new(b, a));
        assert_eq!(Link::new(b, a).endpoints(), (a, b));
        assert!(Link::new(a, b).contains(b));
    }

    #[test]
    fn running_states() {
        assert!(!NodeState::Created.is_running());
        assert!(NodeState::Started.is_running());
        assert!(NodeState::Connected.is_running());
        assert!(!NodeState::Stopped.is_running());
    }
}
