//! Typed publish/subscribe of network events.
//!
//! Every subscriber owns a bounded FIFO. Publishing never blocks: when a
//! subscriber's buffer is full its oldest event is discarded and its drop
//! counter goes up. There is no ordering across subscribers.

#![allow(clippy::disallowed_types, reason = "Synchronous locking operations only")]

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use simnet_core::NodeId;
use simnet_proto::MessageKind;
use tokio::{sync::Notify, time::Instant};

use crate::config::DEFAULT_EVENT_CAPACITY;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Node started
    NodeUp,
    /// Node stopped
    NodeDown,
    /// Connection established
    Connected,
    /// Connection torn down
    Disconnected,
    /// Session wrote a message
    MessageSent,
    /// Session read a message
    MessageReceived,
}

/// An immutable network event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkEvent {
    /// What happened
    pub kind: EventKind,
    /// Node the event is about
    pub node: NodeId,
    /// Other end of a connection or message, if any
    pub peer: Option<NodeId>,
    /// Message kind for message events
    pub message: Option<MessageKind>,
    /// Time since the bus was created
    pub at: Duration,
}

struct Subscriber {
    queue: Mutex<VecDeque<NetworkEvent>>,
    dropped: AtomicU64,
    closed: AtomicBool,
    ready: Notify,
}

impl Subscriber {
    fn queue(&self) -> MutexGuard<'_, VecDeque<NetworkEvent>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.ready.notify_one();
    }
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: HashMap<u64, Arc<Subscriber>>,
}

struct BusInner {
    capacity: usize,
    epoch: Instant,
    dropped: AtomicU64,
    registry: Mutex<Registry>,
}

impl BusInner {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, id: u64) -> Option<Arc<Subscriber>> {
        self.registry().subscribers.remove(&id)
    }
}

/// Event bus shared by a topology and everything observing it.
///
/// Cloning is cheap; clones publish to the same subscribers.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.inner.capacity)
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

impl EventBus {
    /// Bus with the default per-subscriber capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Bus holding at most `capacity` undelivered events per subscriber.
    ///
    /// A capacity of zero is treated as one.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                capacity: capacity.max(1),
                epoch: Instant::now(),
                dropped: AtomicU64::new(0),
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    /// Per-subscriber capacity.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Register a new subscriber.
    ///
    /// The subscriber sees only events published after this call. Dropping
    /// the handle unsubscribes.
    pub fn subscribe(&self) -> (EventStream, SubscriptionHandle) {
        let subscriber = Arc::new(Subscriber {
            queue: Mutex::new(VecDeque::new()),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            ready: Notify::new(),
        });

        let id = {
            let mut registry = self.inner.registry();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.subscribers.insert(id, Arc::clone(&subscriber));
            id
        };

        let stream = EventStream { subscriber: Arc::clone(&subscriber) };
        let handle = SubscriptionHandle { id, bus: Arc::downgrade(&self.inner), subscriber };
        (stream, handle)
    }

    /// Remove a subscriber. Idempotent.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        handle.unsubscribe();
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.registry().subscribers.len()
    }

    /// Events discarded across all subscribers since the bus was created.
    pub fn dropped_total(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Publish an event to every subscriber. Never blocks on a slow reader.
    pub fn publish(&self, kind: EventKind, node: NodeId, peer: Option<NodeId>) {
        self.publish_event(kind, node, peer, None);
    }

    /// Publish a message event.
    pub fn publish_message(
        &self,
        kind: EventKind,
        node: NodeId,
        peer: NodeId,
        message: MessageKind,
    ) {
        self.publish_event(kind, node, Some(peer), Some(message));
    }

    fn publish_event(
        &self,
        kind: EventKind,
        node: NodeId,
        peer: Option<NodeId>,
        message: Option<MessageKind>,
    ) {
        let event = NetworkEvent { kind, node, peer, message, at: self.inner.epoch.elapsed() };
        let registry = self.inner.registry();

        for subscriber in registry.subscribers.values() {
            {
                let mut queue = subscriber.queue();
                if queue.len() >= self.inner.capacity {
                    queue.pop_front();
                    subscriber.dropped.fetch_add(1, Ordering::Relaxed);
                    self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                }
                queue.push_back(event.clone());
            }
            subscriber.ready.notify_one();
        }
    }
}

/// Receiving side of a subscription.
pub struct EventStream {
    subscriber: Arc<Subscriber>,
}

impl EventStream {
    /// Next event in publish order.
    ///
    /// Returns `None` once the subscription is closed and the buffer is
    /// drained.
    pub async fn recv(&mut self) -> Option<NetworkEvent> {
        loop {
            if let Some(event) = self.subscriber.queue().pop_front() {
                return Some(event);
            }
            if self.subscriber.closed.load(Ordering::Acquire) {
                return None;
            }
            self.subscriber.ready.notified().await;
        }
    }

    /// Next buffered event, without waiting.
    pub fn try_recv(&mut self) -> Option<NetworkEvent> {
        self.subscriber.queue().pop_front()
    }

    /// Events discarded from this subscriber's buffer.
    pub fn dropped(&self) -> u64 {
        self.subscriber.dropped.load(Ordering::Relaxed)
    }

    /// Events currently buffered.
    pub fn len(&self) -> usize {
        self.subscriber.queue().len()
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("buffered", &self.len())
            .field("dropped", &self.dropped())
            .finish()
    }
}

/// Registration token for a subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: u64,
    bus: Weak<BusInner>,
    subscriber: Arc<Subscriber>,
}

impl SubscriptionHandle {
    /// Stop receiving events. Idempotent.
    ///
    /// Events already buffered can still be drained from the stream.
    pub fn unsubscribe(&self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
        self.subscriber.close();
    }

    /// Whether this subscription is still registered.
    pub fn is_active(&self) -> bool {
        !self.subscriber.closed.load(Ordering::Acquire)
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber").field("dropped", &self.dropped).finish_non_exhaustive()
    }
}
