//! Min-worker (§4.2) and max-worker (§4.3) enforcement stages.

use std::collections::BTreeMap;

use tracing::debug;

use crate::node::{
    ResourceRequestSource, SchedulingNode, SchedulingNodeStatus, TerminationCause,
    TerminationRequest,
};
use crate::types::NodeTypeConfig;

/// Total non-terminating node count across all types, used against the
/// global `max_num_nodes` cap. Heads count toward this but are excluded
/// from victim selection.
fn total_non_terminating(nodes: &[SchedulingNode]) -> usize {
    nodes
        .iter()
        .filter(|n| n.status != SchedulingNodeStatus::ToTerminate)
        .count()
}

fn count_non_terminating_of_type(nodes: &[SchedulingNode], node_type: &str) -> usize {
    nodes
        .iter()
        .filter(|n| n.node_type == node_type && n.status != SchedulingNodeStatus::ToTerminate)
        .count()
}

/// Stage 2: mint pending nodes so every type meets `min_worker_nodes`,
/// never exceeding that type's `max_worker_nodes` nor the global cap.
pub fn enforce_min_workers(
    nodes: &mut Vec<SchedulingNode>,
    node_type_configs: &BTreeMap<String, NodeTypeConfig>,
    max_num_nodes: Option<u64>,
) {
    for (type_name, config) in node_type_configs {
        if config.min_worker_nodes == 0 {
            continue;
        }
        let current = count_non_terminating_of_type(nodes, type_name) as u64;
        if current >= config.min_worker_nodes {
            continue;
        }
        let mut to_mint = config.min_worker_nodes - current;
        to_mint = to_mint.min(config.max_worker_nodes.saturating_sub(current));

        if let Some(cap) = max_num_nodes {
            let total = total_non_terminating(nodes) as u64;
            to_mint = to_mint.min(cap.saturating_sub(total));
        }

        for _ in 0..to_mint {
            nodes.push(SchedulingNode::new_pending(config));
        }
        if to_mint > 0 {
            debug!(node_type = %type_name, count = to_mint, "minted pending nodes to satisfy min_worker_nodes");
        }
    }
}

/// Victim ordering for max-worker enforcement: non-running nodes first,
/// then lower utilization (using the PENDING_DEMAND view), then instance id
/// lexicographically. Head nodes are never candidates.
fn victim_cmp(a: &SchedulingNode, b: &SchedulingNode) -> std::cmp::Ordering {
    a.is_running()
        .cmp(&b.is_running())
        .then_with(|| {
            a.utilization_score(ResourceRequestSource::PendingDemand)
                .total_cmp(&b.utilization_score(ResourceRequestSource::PendingDemand))
        })
        .then_with(|| a.im_instance_id.cmp(&b.im_instance_id))
}

fn pick_victims<'a>(
    candidates: &mut Vec<&'a mut SchedulingNode>,
    excess: usize,
) -> usize {
    candidates.sort_by(|a, b| victim_cmp(a, b));
    let terminate_count = excess.min(candidates.len());
    for victim in candidates.iter_mut().take(terminate_count) {
        victim.status = SchedulingNodeStatus::ToTerminate;
    }
    terminate_count
}

/// Stage 3: terminate excess nodes, per-type bound first, then the global
/// bound over whatever remains.
pub fn enforce_max_workers(
    nodes: &mut [SchedulingNode],
    node_type_configs: &BTreeMap<String, NodeTypeConfig>,
    max_num_nodes: Option<u64>,
) {
    for (type_name, config) in node_type_configs {
        let mut candidates: Vec<&mut SchedulingNode> = nodes
            .iter_mut()
            .filter(|n| {
                n.node_type == *type_name
                    && !n.is_head()
                    && n.status != SchedulingNodeStatus::ToTerminate
            })
            .collect();
        let count = candidates.len() as u64;
        if count <= config.max_worker_nodes {
            continue;
        }
        let excess = (count - config.max_worker_nodes) as usize;
        let terminated = pick_victims(&mut candidates, excess);
        for victim in candidates.into_iter().take(terminated) {
            victim.termination_request = Some(TerminationRequest {
                cause: TerminationCause::MaxNumNodePerType,
            });
        }
        debug!(node_type = %type_name, count = terminated, "terminated excess nodes for per-type max");
    }

    if let Some(cap) = max_num_nodes {
        let total = total_non_terminating(nodes) as u64;
        if total > cap {
            let excess = (total - cap) as usize;
            let mut candidates: Vec<&mut SchedulingNode> = nodes
                .iter_mut()
                .filter(|n| !n.is_head() && n.status != SchedulingNodeStatus::ToTerminate)
                .collect();
            let terminated = pick_victims(&mut candidates, excess);
            for victim in candidates.into_iter().take(terminated) {
                victim.termination_request = Some(TerminationRequest {
                    cause: TerminationCause::MaxNumNodes,
                });
            }
            debug!(count = terminated, "terminated excess nodes for global max_num_nodes");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::ResourceRequestSource;
    use crate::types::{NodeKind, ResourceMap};

    fn make_node(id: &str, running: bool, available_cpu: f64) -> SchedulingNode {
        let mut views = BTreeMap::new();
        views.insert(
            ResourceRequestSource::PendingDemand,
            ResourceMap::from([("CPU".to_string(), available_cpu)]),
        );
        views.insert(
            ResourceRequestSource::ClusterResourceConstraint,
            ResourceMap::from([("CPU".to_string(), 1.0)]),
        );
        SchedulingNode {
            node_type: "type_1".into(),
            node_kind: NodeKind::Worker,
            total_resources: ResourceMap::from([("CPU".to_string(), 1.0)]),
            labels: BTreeMap::new(),
            launch_config_hash: String::new(),
            available_resources_for_sched: views,
            status: SchedulingNodeStatus::Schedulable,
            termination_request: None,
            ray_node_id: if running { format!("r{id}") } else { String::new() },
            im_instance_id: id.to_string(),
            idle_duration_ms: 0,
            ray_status: if running {
                Some(crate::types::RayNodeStatus::Running)
            } else {
                None
            },
            pending: false,
        }
    }

    #[test]
    fn min_workers_mints_pending_nodes_capped_by_max() {
        let mut nodes = Vec::new();
        let mut configs = BTreeMap::new();
        configs.insert(
            "type_1".to_string(),
            NodeTypeConfig {
                name: "type_1".into(),
                resources: ResourceMap::from([("CPU".to_string(), 1.0)]),
                labels: BTreeMap::new(),
                min_worker_nodes: 3,
                max_worker_nodes: 2,
                launch_config_hash: String::new(),
            },
        );
        enforce_min_workers(&mut nodes, &configs, None);
        assert_eq!(nodes.len(), 2);
    }

    #[test]
    fn max_workers_prefers_non_running_then_lower_utilization() {
        let mut nodes = vec![
            make_node("0", false, 1.0),
            make_node("1", true, 0.0),
            make_node("2", true, 0.5),
        ];
        let mut configs = BTreeMap::new();
        configs.insert(
            "type_1".to_string(),
            NodeTypeConfig {
                name: "type_1".into(),
                resources: ResourceMap::from([("CPU".to_string(), 1.0)]),
                labels: BTreeMap::new(),
                min_worker_nodes: 0,
                max_worker_nodes: 2,
                launch_config_hash: String::new(),
            },
        );
        enforce_max_workers(&mut nodes, &configs, None);
        let terminated: Vec<_> = nodes
            .iter()
            .filter(|n| n.status == SchedulingNodeStatus::ToTerminate)
            .map(|n| n.im_instance_id.as_str())
            .collect();
        assert_eq!(terminated, vec!["0"]);
    }

    #[test]
    fn head_nodes_excluded_from_victim_pool() {
        let mut nodes = vec![make_node("0", true, 1.0)];
        nodes[0].node_kind = NodeKind::Head;
        let mut configs = BTreeMap::new();
        configs.insert(
            "type_1".to_string(),
            NodeTypeConfig {
                name: "type_1".into(),
                resources: ResourceMap::from([("CPU".to_string(), 1.0)]),
                labels: BTreeMap::new(),
                min_worker_nodes: 0,
                max_worker_nodes: 2,
                launch_config_hash: String::new(),
            },
        );
        enforce_max_workers(&mut nodes, &configs, Some(0));
        assert_eq!(nodes[0].status, SchedulingNodeStatus::Schedulable);
    }
}
