//! Job producer limits: job cap, per-job budget, idling and clamping.

#![allow(clippy::disallowed_types, reason = "Collecting sink results in tests")]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use simnet_core::{
    JobResult, NodeId, ProducerConfig, ResultSink, StopReason,
    puzzle::{derive_hash, leading_zero_bits},
};
use simnet_harness::{NodeConfig, NodeRole, SimEnv, Topology};

fn collecting_sink() -> (ResultSink, Arc<Mutex<Vec<JobResult>>>) {
    let results = Arc::new(Mutex::new(Vec::new()));
    let sink = {
        let results = Arc::clone(&results);
        ResultSink::from_fn(move |result| results.lock().expect("lock").push(result.clone()))
    };
    (sink, results)
}

async fn wait_for_results(results: &Mutex<Vec<JobResult>>, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while results.lock().expect("lock").len() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("sink received results");
}

fn small_producer(max_jobs: usize) -> ProducerConfig {
    ProducerConfig {
        max_jobs,
        min_submit_difficulty: 1,
        max_difficulty: 6,
        submit_delay: Duration::from_millis(1),
        protocol_id: 0x64,
        ..ProducerConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn worker_stops_at_max_jobs() {
    let mut topology = Topology::new(SimEnv::with_seed(11));
    let (sink, results) = collecting_sink();
    let config = NodeConfig::random(topology.env(), "worker")
        .with_role(NodeRole::Worker { max_difficulty: 4 })
        .with_producer(small_producer(3))
        .with_sink(sink);
    let id = topology.new_node(config).expect("new node");
    topology.start(id).expect("start");

    let report = tokio::time::timeout(Duration::from_secs(10), topology.join_producer(id))
        .await
        .expect("producer finished")
        .expect("report");

    assert_eq!(report.reason, StopReason::MaxJobs);
    assert_eq!(report.jobs_produced, 3);

    wait_for_results(&results, 3).await;
    let results = results.lock().expect("lock").clone();
    assert_eq!(results.len(), 3);
    for result in results {
        assert_eq!(result.node, id);
        assert_eq!(result.protocol_id, 0x64);
        assert_eq!(result.difficulty, 4);
        assert_eq!(result.data.len(), 32);
        assert_eq!(derive_hash(&result.data, &result.nonce), result.hash);
        assert!(leading_zero_bits(&result.hash) >= 4);
    }

    let status = topology.node(id).expect("handle").status().await.expect("status");
    assert_eq!(status.jobs_produced, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unsatisfiable_job_is_abandoned_at_budget() {
    let mut topology = Topology::new(SimEnv::with_seed(12));
    let producer = ProducerConfig {
        min_submit_difficulty: 200,
        max_difficulty: u8::MAX,
        max_time_per_job: Duration::from_millis(30),
        ..small_producer(10)
    };
    let config = NodeConfig::random(topology.env(), "worker")
        .with_role(NodeRole::Worker { max_difficulty: u8::MAX })
        .with_producer(producer);
    let id = topology.new_node(config).expect("new node");
    topology.start(id).expect("start");

    tokio::time::sleep(Duration::from_millis(300)).await;
    topology.stop(id).expect("stop");

    let report = tokio::time::timeout(Duration::from_secs(5), topology.join_producer(id))
        .await
        .expect("producer stopped promptly")
        .expect("report");

    assert_eq!(report.reason, StopReason::Cancelled);
    assert_eq!(report.jobs_produced, 0);
    assert!(report.jobs_abandoned >= 1, "{report:?}");
}

#[tokio::test(start_paused = true)]
async fn budget_runs_out_on_a_paused_clock() {
    let mut topology = Topology::new(SimEnv::with_seed(13));
    let producer = ProducerConfig {
        min_submit_difficulty: 200,
        max_difficulty: u8::MAX,
        max_time_per_job: Duration::from_millis(30),
        ..small_producer(10)
    };
    let config = NodeConfig::random(topology.env(), "worker")
        .with_role(NodeRole::Worker { max_difficulty: u8::MAX })
        .with_producer(producer);
    let id = topology.new_node(config).expect("new node");
    topology.start(id).expect("start");

    // Virtual time stands still here; only the host clock moves.
    tokio::task::spawn_blocking(|| std::thread::sleep(Duration::from_millis(300)))
        .await
        .expect("host sleep");
    topology.stop(id).expect("stop");

    let report = topology.join_producer(id).await.expect("report");

    assert_eq!(report.reason, StopReason::Cancelled);
    assert_eq!(report.jobs_produced, 0);
    assert!(report.jobs_abandoned >= 1, "{report:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn idle_node_waits_then_clamps_requested_difficulty() {
    let mut topology = Topology::new(SimEnv::with_seed(13));
    let (sink, results) = collecting_sink();
    let config = NodeConfig::random(topology.env(), "idle")
        .with_producer(small_producer(2))
        .with_sink(sink);
    let id = topology.new_node(config).expect("new node");
    topology.start(id).expect("start");
    let handle = topology.node(id).expect("handle");

    tokio::time::sleep(Duration::from_millis(100)).await;
    let status = handle.status().await.expect("status");
    assert_eq!(status.difficulty, 0);
    assert_eq!(status.jobs_produced, 0);

    handle.set_difficulty(200).await.expect("set difficulty");

    let report = tokio::time::timeout(Duration::from_secs(10), topology.join_producer(id))
        .await
        .expect("producer finished")
        .expect("report");
    assert_eq!(report.reason, StopReason::MaxJobs);
    assert_eq!(report.jobs_produced, 2);

    wait_for_results(&results, 2).await;
    assert!(results.lock().expect("lock").iter().all(|result| result.difficulty == 6));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panicking_sink_does_not_stop_the_producer() {
    let mut topology = Topology::new(SimEnv::with_seed(14));
    let sink = ResultSink::from_fn(|_| panic!("sink failure"));
    let config = NodeConfig::new(NodeId::from_bytes([4; 32]), "worker")
        .with_role(NodeRole::Worker { max_difficulty: 2 })
        .with_producer(small_producer(3))
        .with_sink(sink);
    let id = topology.new_node(config).expect("new node");
    topology.start(id).expect("start");

    let report = tokio::time::timeout(Duration::from_secs(10), topology.join_producer(id))
        .await
        .expect("producer finished")
        .expect("report");

    assert_eq!(report.reason, StopReason::MaxJobs);
    assert_eq!(report.jobs_produced, 3);
}
