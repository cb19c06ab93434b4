//! Topology lifecycle, connection and diagnostic behavior.

use std::time::Duration;

use simnet_core::{ConfigError, NodeId, SessionError, SessionState};
use simnet_harness::{
    ConnectError, ControlError, EventKind, Link, NodeConfig, NodeState, SimEnv, Topology,
    TopologyError,
};
use simnet_proto::MessageKind;

fn topology(seed: u64, nodes: usize) -> (Topology<SimEnv>, Vec<NodeId>) {
    let mut topology = Topology::new(SimEnv::with_seed(seed));
    let ids = (0..nodes)
        .map(|i| {
            let config = NodeConfig::random(topology.env(), format!("node-{i}"));
            topology.new_node(config).expect("new node")
        })
        .collect();
    (topology, ids)
}

#[tokio::test]
async fn duplicate_identifier_is_rejected() {
    let (mut topology, nodes) = topology(1, 1);

    let result = topology.new_node(NodeConfig::new(nodes[0], "again"));

    assert_eq!(result, Err(ConfigError::DuplicateId(nodes[0])));
    assert_eq!(topology.node_ids(), nodes.as_slice());
}

#[tokio::test]
async fn start_is_only_valid_from_created() {
    let (mut topology, nodes) = topology(2, 1);
    let (mut events, _sub) = topology.events().subscribe();

    topology.start(nodes[0]).expect("start");
    let again = topology.start(nodes[0]);

    assert_eq!(
        again,
        Err(TopologyError::InvalidTransition {
            node: nodes[0],
            state: NodeState::Started,
            operation: "start",
        })
    );
    let event = events.try_recv().expect("node up");
    assert_eq!((event.kind, event.node), (EventKind::NodeUp, nodes[0]));
    assert!(events.try_recv().is_none());
}

#[tokio::test]
async fn connect_validates_endpoints() {
    let (mut topology, nodes) = topology(3, 3);
    let (a, b, c) = (nodes[0], nodes[1], nodes[2]);
    topology.start(a).expect("start a");
    topology.start(b).expect("start b");

    assert_eq!(topology.connect(a, a), Err(ConnectError::SelfConnection(a)));
    assert_eq!(
        topology.connect(a, c),
        Err(ConnectError::NotStarted { node: c, state: NodeState::Created })
    );
    let stranger = NodeId::from_bytes([0xEE; 32]);
    assert_eq!(topology.connect(stranger, a), Err(ConnectError::UnknownNode(stranger)));

    topology.connect(a, b).expect("connect");
    assert_eq!(topology.connect(b, a), Err(ConnectError::AlreadyConnected(Link::new(a, b))));
    assert!(topology.is_connected(b, a));
    assert_eq!(topology.state(a), Some(NodeState::Connected));
    assert_eq!(topology.state(b), Some(NodeState::Connected));

    topology.shutdown().await;
}

#[tokio::test]
async fn connected_pair_exchanges_one_ping_and_pong_each() {
    let (mut topology, nodes) = topology(4, 2);
    let (a, b) = (nodes[0], nodes[1]);
    topology.start_all().expect("start");
    let (mut events, _sub) = topology.events().subscribe();

    topology.connect(a, b).expect("connect");
    let report = tokio::time::timeout(Duration::from_secs(5), topology.join_connection(a, b))
        .await
        .expect("sessions finished within 5s")
        .expect("report");

    assert!(report.is_success());
    for summary in [report.initiator.as_ref(), report.responder.as_ref()] {
        let summary = summary.expect("session");
        assert_eq!(summary.state, SessionState::Terminated);
        assert_eq!(summary.stats.pings_sent, 1);
        assert_eq!(summary.stats.pongs_sent, 1);
        assert_eq!(summary.stats.pongs_received, 1);
    }
    assert_eq!(topology.barrier(a, b).map(|barrier| barrier.remaining()), Some(0));

    let mut sent = Vec::new();
    while let Some(event) = events.try_recv() {
        if event.kind == EventKind::MessageSent {
            sent.push((event.node, event.message));
        }
    }
    sent.sort_by_key(|(node, kind)| (*node, kind.map(MessageKind::to_u8)));
    let mut expected = vec![
        (a, Some(MessageKind::Ping)),
        (a, Some(MessageKind::Pong)),
        (b, Some(MessageKind::Ping)),
        (b, Some(MessageKind::Pong)),
    ];
    expected.sort_by_key(|(node, kind)| (*node, kind.map(MessageKind::to_u8)));
    assert_eq!(sent, expected);

    assert_eq!(
        topology.join_connection(a, b).await.map(|_| ()),
        Err(TopologyError::UnknownConnection(Link::new(a, b)))
    );
}

#[tokio::test]
async fn stop_is_terminal_and_silences_the_node() {
    let (mut topology, nodes) = topology(5, 2);
    topology.start_all().expect("start");
    let handle = topology.node(nodes[0]).expect("handle");
    assert!(handle.status().await.is_ok());
    let (mut events, _sub) = topology.events().subscribe();

    topology.stop(nodes[0]).expect("stop");

    assert_eq!(topology.state(nodes[0]), Some(NodeState::Stopped));
    assert_eq!(
        handle.status().await,
        Err(ControlError::NotRunning { node: nodes[0], state: NodeState::Stopped })
    );
    assert!(matches!(
        topology.stop(nodes[0]),
        Err(TopologyError::InvalidTransition { operation: "stop", .. })
    ));
    assert_eq!(
        topology.connect(nodes[0], nodes[1]),
        Err(ConnectError::NotStarted { node: nodes[0], state: NodeState::Stopped })
    );
    assert_eq!(events.try_recv().map(|event| event.kind), Some(EventKind::NodeDown));

    let report = topology.join_producer(nodes[0]).await.expect("producer report");
    assert_eq!(report.reason, simnet_core::StopReason::Cancelled);
}

#[tokio::test]
async fn snapshot_describes_the_network() {
    let (mut topology, nodes) = topology(6, 3);
    topology.start_all().expect("start");
    topology.connect(nodes[0], nodes[1]).expect("connect");
    topology.join_connection(nodes[0], nodes[1]).await.expect("report");

    let snapshot = topology.snapshot();

    assert_eq!(snapshot.nodes.len(), 3);
    assert_eq!(snapshot.nodes.iter().map(|node| node.id).collect::<Vec<_>>(), nodes);
    assert_eq!(snapshot.nodes[2].state, NodeState::Started);
    assert_eq!(snapshot.connections.len(), 1);
    assert_eq!(snapshot.connections[0].initiator, nodes[0]);
    assert_eq!(snapshot.connections[0].barrier_remaining, 0);
    assert!(snapshot.connections[0].finished);

    let mut encoded = Vec::new();
    ciborium::into_writer(&snapshot, &mut encoded).expect("snapshot serializes");
    assert!(!encoded.is_empty());

    topology.shutdown().await;
}

#[tokio::test]
async fn stopping_a_node_releases_its_unfinished_connections() {
    let (mut topology, nodes) = topology(7, 2);
    topology.start_all().expect("start");
    topology.connect(nodes[0], nodes[1]).expect("connect");
    // Stop before the sessions get a chance to run.
    topology.stop(nodes[1]).expect("stop");

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        topology.join_connection(nodes[0], nodes[1]),
    )
    .await
    .expect("connection released")
    .expect("report");

    // The sessions may have raced to completion; if not, cancellation is
    // what ended them.
    if !report.is_success() {
        assert!(
            report.initiator == Err(SessionError::Cancelled)
                || report.responder == Err(SessionError::Cancelled),
            "{report:?}"
        );
    }
}
