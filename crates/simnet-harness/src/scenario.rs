//! The canonical demo: a star network with one worker.
//!
//! Node 0 is the hub and, by default, the only worker. Every other node is
//! told to idle and reports in after the simulation duration. The step
//! converges once every node has reported and answered a status call.

use std::{collections::HashMap, time::Duration};

use simnet_core::{Environment, NodeId, ResultSink};
use tokio::sync::mpsc;

use crate::{
    config::{HarnessConfig, NodeConfig, RoleAssignment},
    control::NodeHandle,
    engine::{Action, Check, Expectation, Step, check_fn},
    error::{ActionError, CheckError, TopologyError},
    topology::Topology,
};

/// Create, start and star-connect `config.nodes` nodes.
///
/// Node 0 dials every other node. `sink` picks each node's result sink.
///
/// # Errors
///
/// Any configuration, lifecycle or connect error, before or after nodes
/// start.
pub fn build_star<E, S>(
    topology: &mut Topology<E>,
    config: &HarnessConfig,
    roles: &RoleAssignment,
    mut sink: S,
) -> Result<Vec<NodeId>, TopologyError>
where
    E: Environment,
    S: FnMut(NodeId) -> ResultSink,
{
    let roles = roles.resolve(config.nodes, config.producer.max_difficulty)?;

    let mut ids = Vec::with_capacity(roles.len());
    for (index, role) in roles.into_iter().enumerate() {
        let id = NodeId::random(topology.env());
        let node = NodeConfig::new(id, format!("node-{index}"))
            .with_role(role)
            .with_producer(config.producer.clone())
            .with_sink(sink(id));
        ids.push(topology.new_node(node)?);
    }

    topology.start_all()?;

    if let Some((&hub, rest)) = ids.split_first() {
        for &peer in rest {
            topology.connect(hub, peer)?;
        }
    }

    Ok(ids)
}

/// Step for the demo: workers report at once, the rest idle then report
/// after `sim_duration`.
///
/// # Errors
///
/// `TopologyError::UnknownNode` if any of `nodes` is not a member.
pub fn demo_step<E: Environment>(
    topology: &Topology<E>,
    nodes: &[NodeId],
    roles: &RoleAssignment,
    sim_duration: Duration,
) -> Result<Step, TopologyError> {
    let handles = nodes
        .iter()
        .map(|&id| topology.node(id))
        .collect::<Result<Vec<_>, _>>()?;
    let workers: Vec<bool> = (0..nodes.len()).map(|index| roles.is_worker(index)).collect();

    let (trigger_tx, trigger) = mpsc::channel(nodes.len().max(1));
    let action_handles = handles.clone();

    let action = Action::new(move |ctx| async move {
        for (handle, is_worker) in action_handles.into_iter().zip(workers) {
            let id = handle.id();
            if is_worker {
                tracing::info!(node = %id, "appointed worker node");
                trigger_tx
                    .send(id)
                    .await
                    .map_err(|_| ActionError::Failed("trigger receiver dropped".into()))?;
                continue;
            }

            handle.set_difficulty(0).await?;

            let trigger = trigger_tx.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move {
                if ctx.sleep(sim_duration).await {
                    tracing::debug!(node = %id, "stop sending");
                    let _ = trigger.send(id).await;
                }
            });
        }
        Ok(())
    });

    let expect = Expectation::new(nodes.iter().copied(), alive_check(handles));
    Ok(Step { action, trigger, expect })
}

/// Passes a node once it answers a status call and is still running.
pub fn alive_check(handles: Vec<NodeHandle>) -> impl Check {
    let handles: HashMap<NodeId, NodeHandle> =
        handles.into_iter().map(|handle| (handle.id(), handle)).collect();

    check_fn(move |node| {
        let handle = handles.get(&node).cloned();
        async move {
            let handle = handle.ok_or_else(|| CheckError::Failed(format!("no handle for {node}")))?;
            let status = handle.status().await?;
            Ok(status.state.is_running())
        }
    })
}
