//! simnet demo binary.
//!
//! Builds a five-node star, appoints node 0 as the only worker, idles the
//! rest, and runs one convergence step under a deadline.
//!
//! # Usage
//!
//! ```bash
//! # Default run
//! simnet
//!
//! # Verbose, with results forwarded to the external sink
//! simnet -v -r -e results.mutable.test
//! ```

use std::time::Duration;

use clap::Parser;
use simnet_core::{JobResult, ResultSink};
use simnet_harness::{
    HarnessConfig, RoleAssignment, Simulation, StepContext, SystemEnv, Topology, scenario,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Peer-to-peer protocol convergence harness
#[derive(Parser, Debug)]
#[command(name = "simnet")]
#[command(about = "Scripted convergence harness for peer-to-peer protocols")]
#[command(version)]
struct Args {
    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Forward results to the external sink
    #[arg(short = 'r', long)]
    result_sink: bool,

    /// Name results are posted under (default: <node-id-hex>.mutable.test)
    #[arg(short = 'e', long)]
    sink_target: Option<String>,

    /// Number of nodes
    #[arg(long, default_value_t = simnet_harness::config::DEFAULT_NODES)]
    nodes: usize,

    /// Step deadline in seconds
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,

    /// Delay before idle nodes report, in milliseconds
    #[arg(long, default_value_t = 5000)]
    sim_duration_ms: u64,

    /// Keep the worker running after the step until Ctrl-C
    #[arg(long)]
    linger: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let level = if args.verbose { "debug" } else { args.log_level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = HarnessConfig {
        nodes: args.nodes,
        step_timeout: Duration::from_secs(args.timeout_secs),
        sim_duration: Duration::from_millis(args.sim_duration_ms),
        ..HarnessConfig::default()
    };
    let roles = RoleAssignment::single_worker(0);

    let mut topology = Topology::with_capacities(
        SystemEnv::new(),
        config.event_capacity,
        config.control_capacity,
    );

    let nodes = scenario::build_star(&mut topology, &config, &roles, |id| {
        if !args.result_sink {
            return ResultSink::NoSink;
        }
        let target =
            args.sink_target.clone().unwrap_or_else(|| format!("{}.mutable.test", id.to_hex()));
        ResultSink::from_fn(move |result| print_result(&target, result))
    })?;
    tracing::info!(nodes = nodes.len(), "network ready");

    let step = scenario::demo_step(&topology, &nodes, &roles, config.sim_duration)?;
    let ctx = StepContext::new().with_timeout(config.step_timeout);
    let result = Simulation::new(&topology).run(&ctx, step).await;

    match &result.error {
        None => tracing::info!(
            elapsed = ?result.elapsed(),
            passed = result.passes.len(),
            events = result.events.len(),
            "simulation converged"
        ),
        Some(err) => tracing::error!(error = %err, "simulation failed"),
    }

    for &id in nodes.iter().skip(1) {
        tracing::debug!(node = %id, "stopping node");
        topology.stop(id)?;
    }

    if args.linger {
        tracing::info!("worker still running, press Ctrl-C to exit");
        tokio::signal::ctrl_c().await?;
    }

    for report in topology.shutdown().await {
        tracing::info!(
            node = %report.node,
            produced = report.jobs_produced,
            abandoned = report.jobs_abandoned,
            reason = ?report.reason,
            "producer report"
        );
    }

    Ok(())
}

#[allow(clippy::print_stdout)]
fn print_result(target: &str, result: &JobResult) {
    println!("RESULT >> {result} [{target}]");
}
