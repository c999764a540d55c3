//! Gang scheduling (§4.5): a set of [`ResourceRequest`]s that must all be
//! placed, or none of them are. AFFINITY(key, value) forces every bundle in
//! the gang carrying that same tag onto one shared node (their resource
//! bundles are summed and treated as a single placement unit);
//! ANTI_AFFINITY(key, value) forces bundles carrying that tag onto pairwise
//! distinct nodes. Placement uses the PENDING_DEMAND accounting view since
//! gangs represent actual workload, not a standing floor.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::config::SchedulerConfig;
use crate::node::{ResourceRequestSource, SchedulingNode};
use crate::scoring::best_node_type;
use crate::types::{
    GangResourceRequest, NodeTypeConfig, PlacementConstraintKind, ResourceMap, ResourceRequest,
};

const SOURCE: ResourceRequestSource = ResourceRequestSource::PendingDemand;

/// One or more gang members merged by shared AFFINITY tags into a single
/// placement unit, plus the ANTI_AFFINITY tags that still apply to it.
struct PlacementUnit {
    bundle: ResourceMap,
    anti_affinity_tags: BTreeSet<(String, String)>,
}

fn merge_bundles(into: &mut ResourceMap, from: &ResourceMap) {
    for (resource, qty) in from {
        *into.entry(resource.clone()).or_insert(0.0) += qty;
    }
}

/// Union-find over gang member indices, merging any two members that share
/// an identical AFFINITY(key, value) constraint.
fn group_by_affinity(requests: &[ResourceRequest]) -> Vec<PlacementUnit> {
    let mut parent: Vec<usize> = (0..requests.len()).collect();

    fn find(parent: &mut [usize], x: usize) -> usize {
        if parent[x] != x {
            parent[x] = find(parent, parent[x]);
        }
        parent[x]
    }
    fn union(parent: &mut [usize], a: usize, b: usize) {
        let ra = find(parent, a);
        let rb = find(parent, b);
        if ra != rb {
            parent[ra.max(rb)] = ra.min(rb);
        }
    }

    let mut by_tag: BTreeMap<(String, String), Vec<usize>> = BTreeMap::new();
    for (idx, request) in requests.iter().enumerate() {
        for constraint in &request.placement_constraints {
            if constraint.kind == PlacementConstraintKind::Affinity {
                by_tag
                    .entry((constraint.label_key.clone(), constraint.label_value.clone()))
                    .or_default()
                    .push(idx);
            }
        }
    }
    for members in by_tag.values() {
        for window in members.windows(2) {
            union(&mut parent, window[0], window[1]);
        }
    }

    let mut units: BTreeMap<usize, PlacementUnit> = BTreeMap::new();
    for (idx, request) in requests.iter().enumerate() {
        let root = find(&mut parent, idx);
        let unit = units.entry(root).or_insert_with(|| PlacementUnit {
            bundle: ResourceMap::new(),
            anti_affinity_tags: BTreeSet::new(),
        });
        merge_bundles(&mut unit.bundle, &request.resources_bundle);
        for constraint in &request.placement_constraints {
            if constraint.kind == PlacementConstraintKind::AntiAffinity {
                unit.anti_affinity_tags
                    .insert((constraint.label_key.clone(), constraint.label_value.clone()));
            }
        }
    }
    units.into_values().collect()
}

/// Places one unit, excluding any node already used by another unit sharing
/// one of its anti-affinity tags. Returns the index of the node it landed
/// on, or `None` if it couldn't be placed at all.
fn place_unit(
    nodes: &mut Vec<SchedulingNode>,
    unit: &PlacementUnit,
    excluded: &BTreeSet<usize>,
    node_type_configs: &BTreeMap<String, NodeTypeConfig>,
    config: &SchedulerConfig,
    max_num_nodes: Option<u64>,
) -> Option<usize> {
    let mut best_existing: Option<(usize, f64)> = None;
    for (idx, node) in nodes.iter().enumerate() {
        if excluded.contains(&idx) {
            continue;
        }
        if !node.fits(&unit.bundle, SOURCE) {
            continue;
        }
        let score = node.utilization_score(SOURCE);
        if best_existing.map(|(_, s)| score > s).unwrap_or(true) {
            best_existing = Some((idx, score));
        }
    }
    if let Some((idx, _)) = best_existing {
        nodes[idx].allocate(&unit.bundle, SOURCE);
        return Some(idx);
    }

    if let Some(cap) = max_num_nodes {
        if nodes.len() as u64 >= cap {
            return None;
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

    let best_type = best_node_type(mintable, &unit.bundle, config)?;
    let mut node = SchedulingNode::new_pending(best_type);
    node.allocate(&unit.bundle, SOURCE);
    nodes.push(node);
    Some(nodes.len() - 1)
}

/// Places every gang in `gangs`, each atomically. Returns the gangs that
/// could not be fully placed (node set is left unchanged per rejected gang).
pub fn schedule_gangs(
    nodes: &mut Vec<SchedulingNode>,
    gangs: &[GangResourceRequest],
    node_type_configs: &BTreeMap<String, NodeTypeConfig>,
    config: &SchedulerConfig,
    max_num_nodes: Option<u64>,
) -> Vec<GangResourceRequest> {
    let mut infeasible = Vec::new();

    for gang in gangs {
        let snapshot = nodes.clone();
        let units = group_by_affinity(&gang.requests);

        let mut tag_usage: BTreeMap<(String, String), BTreeSet<usize>> = BTreeMap::new();
        let mut ok = true;

        for unit in &units {
            let excluded: BTreeSet<usize> = unit
                .anti_affinity_tags
                .iter()
                .flat_map(|tag| tag_usage.get(tag).cloned().unwrap_or_default())
                .collect();

            match place_unit(nodes, unit, &excluded, node_type_configs, config, max_num_nodes) {
                Some(node_idx) => {
                    for tag in &unit.anti_affinity_tags {
                        tag_usage.entry(tag.clone()).or_default().insert(node_idx);
                    }
                }
                None => {
                    ok = false;
                    break;
                }
            }
        }

        if ok {
            debug!(requests = gang.requests.len(), units = units.len(), "gang placed");
        } else {
            warn!("gang infeasible, rolling back");
            *nodes = snapshot;
            infeasible.push(gang.clone());
        }
    }

    infeasible
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PlacementConstraint, ResourceMap};

    fn type_cpu(cpu: f64, max: u64) -> NodeTypeConfig {
        NodeTypeConfig {
            name: "type_cpu".into(),
            resources: ResourceMap::from([("CPU".to_string(), cpu)]),
            labels: BTreeMap::new(),
            min_worker_nodes: 0,
            max_worker_nodes: max,
            launch_config_hash: String::new(),
        }
    }

    fn catalog(cpu: f64, max: u64) -> BTreeMap<String, NodeTypeConfig> {
        BTreeMap::from([("type_cpu".to_string(), type_cpu(cpu, max))])
    }

    fn one_cpu_with(kind: PlacementConstraintKind) -> ResourceRequest {
        ResourceRequest::with_constraints(
            ResourceMap::from([("CPU".to_string(), 1.0)]),
            vec![PlacementConstraint {
                kind,
                label_key: "pg".into(),
                label_value: String::new(),
            }],
        )
    }

    #[test]
    fn anti_affinity_forces_distinct_nodes() {
        let mut nodes = Vec::new();
        let gang = GangResourceRequest {
            requests: vec![
                one_cpu_with(PlacementConstraintKind::AntiAffinity),
                one_cpu_with(PlacementConstraintKind::AntiAffinity),
            ],
        };
        let infeasible = schedule_gangs(
            &mut nodes,
            std::slice::from_ref(&gang),
            &catalog(2.0, 5),
            &SchedulerConfig::default(),
            None,
        );
        assert!(infeasible.is_empty());
        assert_eq!(nodes.len(), 2);
    }

    #[test]
    fn affinity_colocates_on_one_node() {
        let mut nodes = Vec::new();
        let gang = GangResourceRequest {
            requests: vec![
                one_cpu_with(PlacementConstraintKind::Affinity),
                one_cpu_with(PlacementConstraintKind::Affinity),
            ],
        };
        let infeasible = schedule_gangs(
            &mut nodes,
            std::slice::from_ref(&gang),
            &catalog(2.0, 5),
            &SchedulerConfig::default(),
            None,
        );
        assert!(infeasible.is_empty());
        assert_eq!(nodes.len(), 1);
    }

    #[test]
    fn infeasible_atomic_affinity_gang_rolls_back() {
        let mut nodes = Vec::new();
        let big = |kind| {
            ResourceRequest::with_constraints(
                ResourceMap::from([("CPU".to_string(), 3.0)]),
                vec![PlacementConstraint {
                    kind,
                    label_key: "pg".into(),
                    label_value: String::new(),
                }],
            )
        };
        let gang = GangResourceRequest {
            requests: vec![
                big(PlacementConstraintKind::Affinity),
                big(PlacementConstraintKind::Affinity),
            ],
        };
        let infeasible = schedule_gangs(
            &mut nodes,
            std::slice::from_ref(&gang),
            &catalog(2.0, 5),
            &SchedulerConfig::default(),
            None,
        );
        assert_eq!(infeasible.len(), 1);
        assert!(nodes.is_empty());
    }

    #[test]
    fn plain_gang_with_no_constraints_places_both_independently() {
        let mut nodes = Vec::new();
        let gang = GangResourceRequest {
            requests: vec![
                ResourceRequest::new(ResourceMap::from([("CPU".to_string(), 1.0)])),
                ResourceRequest::new(ResourceMap::from([("CPU".to_string(), 1.0)])),
            ],
        };
        let infeasible = schedule_gangs(
            &mut nodes,
            std::slice::from_ref(&gang),
            &catalog(2.0, 5),
            &SchedulerConfig::default(),
            None,
        );
        assert!(infeasible.is_empty());
        assert_eq!(nodes.len(), 1);
    }

    #[test]
    fn rolls_back_whole_gang_when_global_cap_blocks_second_unit() {
        let mut nodes = Vec::new();
        let gang = GangResourceRequest {
            requests: vec![
                one_cpu_with(PlacementConstraintKind::AntiAffinity),
                one_cpu_with(PlacementConstraintKind::AntiAffinity),
            ],
        };
        let infeasible = schedule_gangs(
            &mut nodes,
            std::slice::from_ref(&gang),
            &catalog(2.0, 5),
            &SchedulerConfig::default(),
            Some(1),
        );
        assert_eq!(infeasible.len(), 1);
        assert!(nodes.is_empty());
    }
}
