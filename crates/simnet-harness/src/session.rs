//! Session runtime: drives a [`PeerSession`] over an async byte stream.
//!
//! The runtime sends the initial ping, then reads until its own ping is
//! acknowledged, answering pings and delivering payloads along the way.
//! After the acknowledgement it arrives at the connection's barrier and keeps
//! the stream open until the peer has arrived too.
//!
//! Any I/O or decode failure ends this session with an error. The connection
//! owner decides what happens to the other side.

use std::sync::Arc;

use serde::Serialize;
use simnet_core::{
    CompletionBarrier, Environment, NodeId, PeerSession, SessionAction, SessionError,
    SessionSummary,
};
use tokio::io::{AsyncRead, AsyncWrite, WriteHalf};
use tokio_util::sync::CancellationToken;

use crate::{
    events::{EventBus, EventKind},
    topology::Link,
    wire,
};

/// Everything a running session needs besides its stream.
#[derive(Debug, Clone)]
pub struct SessionContext<E> {
    /// Local node
    pub node: NodeId,
    /// Clock and randomness
    pub env: E,
    /// Where message events go
    pub bus: EventBus,
    /// Shared with the other session of this connection
    pub barrier: Arc<CompletionBarrier>,
    /// Cancelled when the connection is torn down
    pub cancel: CancellationToken,
}

/// Outcome of both sessions of one connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionReport {
    /// The connection
    pub link: Link,
    /// Dialing side
    #[serde(serialize_with = "serialize_outcome")]
    pub initiator: Result<SessionSummary, SessionError>,
    /// Accepting side
    #[serde(serialize_with = "serialize_outcome")]
    pub responder: Result<SessionSummary, SessionError>,
}

impl ConnectionReport {
    /// Whether both sessions finished cleanly.
    pub fn is_success(&self) -> bool {
        self.initiator.is_ok() && self.responder.is_ok()
    }
}

fn serialize_outcome<S>(
    outcome: &Result<SessionSummary, SessionError>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match outcome {
        Ok(summary) => summary.serialize(serializer),
        Err(err) => serializer.serialize_str(&err.to_string()),
    }
}

/// Run one session to completion.
///
/// Returns once our ping has been acknowledged and every session sharing the
/// barrier has arrived.
///
/// # Errors
///
/// - `SessionError::Transport` on I/O failure or if the peer closes before
///   acknowledging
/// - `SessionError::Protocol` for a malformed frame
/// - `SessionError::UnexpectedMessage` for a message the session does not
///   accept in its current state
/// - `SessionError::Cancelled` if the connection is torn down first
pub async fn run_session<S, E>(
    stream: S,
    mut session: PeerSession,
    ctx: SessionContext<E>,
) -> Result<SessionSummary, SessionError>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
    E: Environment,
{
    let peer = session.peer();
    let (mut reader, mut writer) = tokio::io::split(stream);

    tracing::debug!(node = %ctx.node, %peer, role = ?session.role(), "session starting");

    let actions = session.start(ctx.env.wall_clock_ms())?;
    execute(actions, &mut writer, &ctx, peer).await?;

    while !session.is_acknowledged() {
        let message = tokio::select! {
            () = ctx.cancel.cancelled() => return Err(SessionError::Cancelled),
            read = wire::read_message(&mut reader) => read?,
        };

        let Some(message) = message else {
            return Err(SessionError::Transport(format!(
                "peer {peer} closed before acknowledging"
            )));
        };

        ctx.bus.publish_message(EventKind::MessageReceived, ctx.node, peer, message.kind);
        let actions = session.handle_message(message, ctx.env.wall_clock_ms())?;
        execute(actions, &mut writer, &ctx, peer).await?;
    }

    tokio::select! {
        () = ctx.cancel.cancelled() => return Err(SessionError::Cancelled),
        () = ctx.barrier.wait() => {},
    }

    let summary = session.summary();
    tracing::debug!(node = %ctx.node, %peer, stats = ?summary.stats, "session complete");
    Ok(summary)
}

async fn execute<S, E>(
    actions: Vec<SessionAction>,
    writer: &mut WriteHalf<S>,
    ctx: &SessionContext<E>,
    peer: NodeId,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    for action in actions {
        match action {
            SessionAction::Send(message) => {
                let kind = message.kind;
                wire::write_message(writer, message).await?;
                ctx.bus.publish_message(EventKind::MessageSent, ctx.node, peer, kind);
            },
            SessionAction::Acknowledged => {
                let released = ctx.barrier.arrive();
                tracing::trace!(node = %ctx.node, %peer, released, "acknowledged");
            },
            SessionAction::Deliver(message) => {
                let bytes = message.data.len();
                tracing::debug!(node = %ctx.node, %peer, bytes, "payload delivered");
            },
        }
    }
    Ok(())
}

/// Run both sessions of a connection and report on each.
///
/// If either session fails the connection token is cancelled so the other
/// side stops waiting on the barrier.
pub(crate) async fn run_connection<S, E>(
    link: Link,
    initiator: (S, PeerSession, SessionContext<E>),
    responder: (S, PeerSession, SessionContext<E>),
) -> ConnectionReport
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
    E: Environment,
{
    let cancel = initiator.2.cancel.clone();

    let guarded = |(stream, session, ctx): (S, PeerSession, SessionContext<E>)| {
        let cancel = cancel.clone();
        async move {
            let node = ctx.node;
            let result = run_session(stream, session, ctx).await;
            if let Err(err) = &result {
                if err.is_transient() {
                    tracing::debug!(%node, %link, error = %err, "session ended");
                } else {
                    tracing::warn!(%node, %link, error = %err, "session failed");
                }
                cancel.cancel();
            }
            result
        }
    };

    let (initiator, responder) = tokio::join!(guarded(initiator), guarded(responder));
    ConnectionReport { link, initiator, responder }
}

#[cfg(test)]
mod tests {
    use simnet_core::{Role, SessionState};
    use simnet_proto::Message;

    use super::*;
    use crate::SimEnv;

    fn context(
        node: u8,
        bus: &EventBus,
        barrier: &Arc<CompletionBarrier>,
    ) -> SessionContext<SimEnv> {
        SessionContext {
            node: NodeId::from_bytes([node; 32]),
            env: SimEnv::with_seed(u64::from(node)),
            bus: bus.clone(),
            barrier: Arc::clone(barrier),
            cancel: CancellationToken::new(),
        }
    }

    fn initiator() -> PeerSession {
        PeerSession::new(NodeId::from_bytes([2; 32]), Role::Initiator)
    }

    #[tokio::test]
    async fn sessions_release_barrier() {
        let bus = EventBus::new();
        let barrier = Arc::new(CompletionBarrier::new(2));
        let (left, right) = tokio::io::duplex(1024);
        let a = context(1, &bus, &barrier);
        let b = context(2, &bus, &barrier);

        let (ra, rb) = tokio::join!(
            run_session(left, PeerSession::new(b.node, Role::Initiator), a),
            run_session(right, PeerSession::new(NodeId::from_bytes([1; 32]), Role::Responder), b),
        );

        let ra = ra.expect("initiator");
        let rb = rb.expect("responder");
        assert_eq!(ra.state, SessionState::Terminated);
        assert_eq!(rb.state, SessionState::Terminated);
        assert!(barrier.is_released());
    }

    #[tokio::test]
    async fn early_close_is_transport_error() {
        let bus = EventBus::new();
        let barrier = Arc::new(CompletionBarrier::new(2));
        let (left, mut right) = tokio::io::duplex(1024);
        let a = context(1, &bus, &barrier);

        let peer = tokio::spawn(async move {
            let ping = wire::read_message(&mut right).await.expect("read").expect("ping");
            assert_eq!(ping.kind, simnet_proto::MessageKind::Ping);
            drop(right);
        });

        let result = run_session(left, initiator(), a).await;
        peer.await.expect("peer task");

        assert!(matches!(result, Err(SessionError::Transport(_))));
        assert_eq!(barrier.remaining(), 2);
    }

    #[tokio::test]
    async fn payload_before_pong_is_counted() {
        let bus = EventBus::new();
        let barrier = Arc::new(CompletionBarrier::new(1));
        let (left, mut right) = tokio::io::duplex(1024);
        let a = context(1, &bus, &barrier);

        tokio::spawn(async move {
            let _ping = wire::read_message(&mut right).await;
            let payload = Message::payload(vec![1, 2, 3], 0);
            wire::write_message(&mut right, payload).await.expect("payload");
            wire::write_message(&mut right, Message::pong(0)).await.expect("pong");
            // Hold the stream until the session is done with it.
            let _ = wire::read_message(&mut right).await;
        });

        let summary = run_session(left, initiator(), a).await.expect("session");

        assert_eq!(summary.stats.payloads_received, 1);
        assert_eq!(summary.stats.pongs_received, 1);
    }

    #[tokio::test]
    async fn cancellation_releases_barrier_waiter() {
        let bus = EventBus::new();
        let barrier = Arc::new(CompletionBarrier::new(2));
        let (left, mut right) = tokio::io::duplex(1024);
        let a = context(1, &bus, &barrier);
        let cancel = a.cancel.clone();

        tokio::spawn(async move {
            let _ping = wire::read_message(&mut right).await;
            wire::write_message(&mut right, Message::pong(0)).await.expect("pong");
            let _ = wire::read_message(&mut right).await;
        });

        let session = tokio::spawn(run_session(left, initiator(), a));

        // Ours arrived, the peer never will.
        while barrier.remaining() != 1 {
            tokio::task::yield_now().await;
        }
        cancel.cancel();

        let result = session.await.expect("session task");
        assert_eq!(result, Err(SessionError::Cancelled));
    }
}
