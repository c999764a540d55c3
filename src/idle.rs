//! Idle termination (§4.7): terminate workers that have been idle longer
//! than the configured timeout, as long as doing so doesn't breach that
//! type's `min_worker_nodes` floor. Suppressed entirely when the request
//! carried any cluster resource constraint — a declared standby floor means
//! idle capacity is there on purpose.

use std::collections::BTreeMap;

use tracing::debug;

use crate::node::{SchedulingNode, SchedulingNodeStatus, TerminationCause, TerminationRequest};
use crate::types::NodeTypeConfig;

pub fn terminate_idle_nodes(
    nodes: &mut [SchedulingNode],
    node_type_configs: &BTreeMap<String, NodeTypeConfig>,
    idle_timeout_ms: u64,
    any_cluster_constraints: bool,
) {
    if any_cluster_constraints {
        debug!("skipping idle termination: cluster resource constraints are present");
        return;
    }

    let mut alive_counts: BTreeMap<&str, u64> = BTreeMap::new();
    for node in nodes.iter() {
        if node.status != SchedulingNodeStatus::ToTerminate {
            *alive_counts.entry(node.node_type.as_str()).or_insert(0) += 1;
        }
    }

    for node in nodes.iter_mut() {
        if node.is_head() || node.status == SchedulingNodeStatus::ToTerminate {
            continue;
        }
        if !node.is_running() {
            continue;
        }
        if node.idle_duration_ms < idle_timeout_ms {
            continue;
        }

        let min_worker_nodes = node_type_configs
            .get(&node.node_type)
            .map(|c| c.min_worker_nodes)
            .unwrap_or(0);
        let alive = alive_counts.get(node.node_type.as_str()).copied().unwrap_or(0);
        if alive <= min_worker_nodes {
            continue;
        }

        node.status = SchedulingNodeStatus::ToTerminate;
        node.termination_request = Some(TerminationRequest {
            cause: TerminationCause::Idle,
        });
        *alive_counts.get_mut(node.node_type.as_str()).unwrap() -= 1;
        debug!(instance_id = %node.im_instance_id, idle_ms = node.idle_duration_ms, "terminating idle node");
    }
}
