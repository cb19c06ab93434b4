//! Session runtime over simulated TCP using turmoil.
//!
//! Two hosts each run one session over a real (simulated) socket and share
//! a completion barrier, as the two halves of a connection do in-process.

#![allow(clippy::disallowed_types, reason = "Collecting session outcomes in tests")]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use simnet_core::{CompletionBarrier, NodeId, PeerSession, Role, SessionState, SessionSummary};
use simnet_harness::{EventBus, EventKind, SessionContext, SimEnv, run_session};
use tokio_util::sync::CancellationToken;
use turmoil::net::{TcpListener, TcpStream};

const INITIATOR: NodeId = NodeId::from_bytes([0xA1; 32]);
const RESPONDER: NodeId = NodeId::from_bytes([0xB2; 32]);

fn context(
    node: NodeId,
    bus: &EventBus,
    barrier: &Arc<CompletionBarrier>,
) -> SessionContext<SimEnv> {
    SessionContext {
        node,
        env: SimEnv::with_seed(node.as_bytes()[0].into()),
        bus: bus.clone(),
        barrier: Arc::clone(barrier),
        cancel: CancellationToken::new(),
    }
}

#[test]
fn sessions_complete_over_tcp() {
    let mut sim = turmoil::Builder::new().simulation_duration(Duration::from_secs(5)).build();
    let bus = EventBus::new();
    let (mut events, _sub) = bus.subscribe();
    let barrier = Arc::new(CompletionBarrier::new(2));
    let outcomes: Arc<Mutex<Vec<SessionSummary>>> = Arc::default();

    {
        let bus = bus.clone();
        let barrier = Arc::clone(&barrier);
        let outcomes = Arc::clone(&outcomes);
        sim.host("responder", move || {
            let ctx = context(RESPONDER, &bus, &barrier);
            let outcomes = Arc::clone(&outcomes);
            async move {
                let listener = TcpListener::bind("0.0.0.0:7000").await?;
                let (stream, _) = listener.accept().await?;
                let summary =
                    run_session(stream, PeerSession::new(INITIATOR, Role::Responder), ctx).await?;
                outcomes.lock().expect("lock").push(summary);
                Ok(())
            }
        });
    }

    {
        let ctx = context(INITIATOR, &bus, &barrier);
        let outcomes = Arc::clone(&outcomes);
        sim.client("initiator", async move {
            let stream = TcpStream::connect("responder:7000").await?;
            let summary =
                run_session(stream, PeerSession::new(RESPONDER, Role::Initiator), ctx).await?;
            outcomes.lock().expect("lock").push(summary);
            Ok(())
        });
    }

    sim.run().expect("simulation failed");

    // The client finishing ends the run; the host may still be wrapping up.
    assert!(barrier.is_released());
    let outcomes = outcomes.lock().expect("lock").clone();
    assert!(!outcomes.is_empty());
    for summary in &outcomes {
        assert_eq!(summary.state, SessionState::Terminated);
        assert_eq!(summary.stats.pings_sent, 1);
        assert_eq!(summary.stats.pongs_sent, 1);
        assert_eq!(summary.stats.pongs_received, 1);
    }

    let mut pings = 0;
    let mut pongs = 0;
    while let Some(event) = events.try_recv() {
        if event.kind == EventKind::MessageSent {
            match event.message {
                Some(simnet_proto::MessageKind::Ping) => pings += 1,
                Some(simnet_proto::MessageKind::Pong) => pongs += 1,
                _ => {},
            }
        }
    }
    assert_eq!((pings, pongs), (2, 2));
}

#[test]
fn peer_sending_garbage_fails_only_its_session() {
    let mut sim = turmoil::Builder::new().simulation_duration(Duration::from_secs(5)).build();
    let bus = EventBus::new();
    let failures: Arc<Mutex<Vec<String>>> = Arc::default();

    sim.host("garbage", || async {
        let listener = TcpListener::bind("0.0.0.0:7000").await?;
        let (mut stream, _) = listener.accept().await?;
        tokio::io::AsyncWriteExt::write_all(&mut stream, &[0xFF; 32]).await?;
        // Keep the socket open; the session must fail on decode, not EOF.
        tokio::time::sleep(Duration::from_secs(2)).await;
        Ok(())
    });

    let healthy_barrier = Arc::new(CompletionBarrier::new(2));
    {
        let bus = bus.clone();
        let barrier = Arc::clone(&healthy_barrier);
        sim.host("responder", move || {
            let ctx = context(RESPONDER, &bus, &barrier);
            async move {
                let listener = TcpListener::bind("0.0.0.0:7001").await?;
                let (stream, _) = listener.accept().await?;
                run_session(stream, PeerSession::new(INITIATOR, Role::Responder), ctx).await?;
                Ok(())
            }
        });
    }

    {
        let broken = context(INITIATOR, &bus, &Arc::new(CompletionBarrier::new(2)));
        let healthy = context(INITIATOR, &bus, &healthy_barrier);
        let failures = Arc::clone(&failures);
        sim.client("initiator", async move {
            let bad_stream = TcpStream::connect("garbage:7000").await?;
            let good_stream = TcpStream::connect("responder:7001").await?;

            let garbage = PeerSession::new(NodeId::from_bytes([0xCC; 32]), Role::Initiator);
            let (bad, good) = tokio::join!(
                run_session(bad_stream, garbage, broken),
                run_session(good_stream, PeerSession::new(RESPONDER, Role::Initiator), healthy),
            );

            if let Err(err) = bad {
                failures.lock().expect("lock").push(err.to_string());
            }
            good?;
            Ok(())
        });
    }

    sim.run().expect("healthy connection completes");

    let failures = failures.lock().expect("lock").clone();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].starts_with("protocol error"), "{failures:?}");
    assert!(healthy_barrier.is_released());
}
