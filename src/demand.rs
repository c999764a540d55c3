//! Individual resource-demand scheduling (§4.6): each [`ResourceRequest`] is
//! placed independently (no atomicity across requests, unlike gangs), best
//! fit among existing nodes, else minting the best-scoring new node type.

use std::collections::BTreeMap;

use tracing::debug;

use crate::config::SchedulerConfig;
use crate::node::{ResourceRequestSource, SchedulingNode};
use crate::scoring::best_node_type;
use crate::types::{NodeTypeConfig, ResourceRequest};

const SOURCE: ResourceRequestSource = ResourceRequestSource::PendingDemand;

/// Places as many `requests` as possible, respecting per-type and the
/// optional global `max_num_nodes` cap on newly minted nodes. Returns the
/// requests that could not be placed, in their original relative order.
pub fn schedule_demand(
    nodes: &mut Vec<SchedulingNode>,
    requests: Vec<ResourceRequest>,
    node_type_configs: &BTreeMap<String, NodeTypeConfig>,
    config: &SchedulerConfig,
    max_num_nodes: Option<u64>,
) -> Vec<ResourceRequest> {
    let mut infeasible = Vec::new();

    for request in requests {
        let mut best_existing: Option<(usize, f64)> = None;
        for (idx, node) in nodes.iter().enumerate() {
            if !node.fits(&request.resources_bundle, SOURCE) {
                continue;
            }
            let score = node.utilization_score(SOURCE);
            if best_existing.map(|(_, s)| score > s).unwrap_or(true) {
                best_existing = Some((idx, score));
            }
        }

        if let Some((idx, _)) = best_existing {
            nodes[idx].allocate(&request.resources_bundle, SOURCE);
            continue;
        }

        if let Some(cap) = max_num_nodes {
            if nodes.len() as u64 >= cap {
                infeasible.push(request);
                continue;
            }
        }

        let mut type_counts: BTreeMap<&str, u64> = BTreeMap::new();
        for node in nodes.iter() {
            *type_counts.entry(node.node_type.as_str()).or_insert(0) += 1;
        }
        let mintable = node_type_configs.values().filter(|c| {
            let current = *type_counts.get(c.name.as_str()).unwrap_or(&0);
            current < c.max_worker_nodes
        });

        match best_node_type(mintable, &request.resources_bundle, config) {
            Some(best_type) => {
                let mut node = SchedulingNode::new_pending(best_type);
                node.allocate(&request.resources_bundle, SOURCE);
                debug!(node_type = %node.node_type, "minted node for demand request");
                nodes.push(node);
            }
            None => infeasible.push(request),
        }
    }

    infeasible
}
