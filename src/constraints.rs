//! Cluster resource constraint scheduling (§4.4): a declared floor the
//! cluster must be able to host simultaneously, checked (and grown into, by
//! minting nodes) against the CLUSTER_RESOURCE_CONSTRAINT accounting view.
//! Each constraint is placed atomically: any bundle copy that can't be
//! placed rolls back every mutation this constraint made.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::config::SchedulerConfig;
use crate::node::{ResourceRequestSource, SchedulingNode};
use crate::scoring::best_node_type;
use crate::types::{ClusterResourceConstraint, NodeTypeConfig, ResourceMap};

const SOURCE: ResourceRequestSource = ResourceRequestSource::ClusterResourceConstraint;

/// Tries to fit one `bundle` copy into an existing node, else mints a new
/// node of the best-scoring type, respecting per-type max caps. Returns
/// `false` (with no mutation) if neither is possible.
fn place_one(
    nodes: &mut Vec<SchedulingNode>,
    bundle: &ResourceMap,
    node_type_configs: &BTreeMap<String, NodeTypeConfig>,
    config: &SchedulerConfig,
    max_num_nodes: Option<u64>,
) -> bool {
    let mut best_existing: Option<(usize, f64)> = None;
    for (idx, node) in nodes.iter().enumerate() {
        if !node.fits(bundle, SOURCE) {
            continue;
        }
        let score = node.utilization_score(SOURCE);
        if best_existing.map(|(_, s)| score > s).unwrap_or(true) {
            best_existing = Some((idx, score));
        }
    }
    if let Some((idx, _)) = best_existing {
        nodes[idx].allocate(bundle, SOURCE);
        return true;
    }

    if let Some(cap) = max_num_nodes {
        if nodes.len() as u64 >= cap {
            return false;
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

    let Some(best_type) = best_node_type(mintable, bundle, config) else {
        return false;
    };

    let mut node = SchedulingNode::new_pending(best_type);
    node.allocate(bundle, SOURCE);
    nodes.push(node);
    true
}

/// Applies every constraint in `constraints`, minting nodes as needed.
/// Returns the constraints that could not be satisfied atomically (each
/// left the node set exactly as it found it).
pub fn apply_constraints(
    nodes: &mut Vec<SchedulingNode>,
    constraints: &[ClusterResourceConstraint],
    node_type_configs: &BTreeMap<String, NodeTypeConfig>,
    config: &SchedulerConfig,
    max_num_nodes: Option<u64>,
) -> Vec<ClusterResourceConstraint> {
    let mut infeasible = Vec::new();

    for constraint in constraints {
        let snapshot = nodes.clone();
        let mut ok = true;

        'bundles: for (request, count) in &constraint.min_bundles {
            for _ in 0..*count {
                if !place_one(
                    nodes,
                    &request.resources_bundle,
                    node_type_configs,
                    config,
                    max_num_nodes,
                ) {
                    ok = false;
                    break 'bundles;
                }
            }
        }

        if ok {
            debug!(bundles = constraint.min_bundles.len(), "cluster resource constraint satisfied");
        } else {
            warn!("cluster resource constraint infeasible, rolling back");
            *nodes = snapshot;
            infeasible.push(constraint.clone());
        }
    }

    infeasible
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::types::ResourceRequest;

    fn type_1() -> NodeTypeConfig {
        NodeTypeConfig {
            name: "type_1".into(),
            resources: ResourceMap::from([("CPU".to_string(), 2.0)]),
            labels: BTreeMap::new(),
            min_worker_nodes: 0,
            max_worker_nodes: 2,
            launch_config_hash: String::new(),
        }
    }

    fn catalog() -> BTreeMap<String, NodeTypeConfig> {
        BTreeMap::from([("type_1".to_string(), type_1())])
    }

    #[test]
    fn mints_nodes_to_satisfy_constraint() {
        let mut nodes = Vec::new();
        let constraint = ClusterResourceConstraint {
            min_bundles: vec![(
                ResourceRequest::new(ResourceMap::from([("CPU".to_string(), 2.0)])),
                2,
            )],
        };
        let infeasible = apply_constraints(
            &mut nodes,
            std::slice::from_ref(&constraint),
            &catalog(),
            &SchedulerConfig::default(),
            None,
        );
        assert!(infeasible.is_empty());
        assert_eq!(nodes.len(), 2);
    }

    #[test]
    fn rolls_back_fully_on_partial_infeasibility() {
        let mut nodes = Vec::new();
        let constraint = ClusterResourceConstraint {
            min_bundles: vec![(
                ResourceRequest::new(ResourceMap::from([("CPU".to_string(), 2.0)])),
                5,
            )],
        };
        let infeasible = apply_constraints(
            &mut nodes,
            std::slice::from_ref(&constraint),
            &catalog(),
            &SchedulerConfig::default(),
            None,
        );
        assert_eq!(infeasible.len(), 1);
        assert!(nodes.is_empty());
    }

    #[test]
    fn rolls_back_fully_when_global_cap_blocks_minting() {
        let mut nodes = Vec::new();
        let constraint = ClusterResourceConstraint {
            min_bundles: vec![(
                ResourceRequest::new(ResourceMap::from([("CPU".to_string(), 2.0)])),
                2,
            )],
        };
        let infeasible = apply_constraints(
            &mut nodes,
            std::slice::from_ref(&constraint),
            &catalog(),
            &SchedulerConfig::default(),
            Some(1),
        );
        assert_eq!(infeasible.len(), 1);
        assert!(nodes.is_empty());
    }
}
