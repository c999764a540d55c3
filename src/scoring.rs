//! Node-type scoring for demand scheduling (§4.6): which node type to mint
//! when no existing node fits a request.

use std::cmp::Ordering;

use crate::config::SchedulerConfig;
use crate::types::{NodeTypeConfig, ResourceMap};

/// Lexicographically-comparable score for launching a candidate node type
/// against a request. Larger is better; ties broken by type name ascending
/// at the call site (kept out of the tuple so two different types with
/// identical scores still sort deterministically without requiring `Ord` on
/// the type name inside the tuple itself).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeTypeScore {
    /// Component A: count of distinct resource dimensions of the candidate
    /// type that the request actually consumes.
    pub resource_kinds_used: i64,
    /// Component C: true if this type should *not* be penalized for
    /// carrying GPU the request doesn't need.
    pub gpu_conservation_ok: bool,
    /// Component B: mean utilization ratio over the request's dimensions.
    pub utilization_ratio: f64,
}

impl NodeTypeScore {
    /// `Ordering::Greater` means `self` should be preferred over `other`.
    pub fn cmp_desc(&self, other: &Self) -> Ordering {
        self.resource_kinds_used
            .cmp(&other.resource_kinds_used)
            .then_with(|| self.gpu_conservation_ok.cmp(&other.gpu_conservation_ok))
            .then_with(|| {
                self.utilization_ratio
                    .partial_cmp(&other.utilization_ratio)
                    .unwrap_or(Ordering::Equal)
            })
    }
}

/// Computes the score of launching `candidate` to satisfy `bundle`, or
/// `None` if the type cannot possibly host the bundle (a non-implicit
/// dimension the request needs exceeds the type's total).
pub fn score_node_type(
    candidate: &NodeTypeConfig,
    bundle: &ResourceMap,
    config: &SchedulerConfig,
) -> Option<NodeTypeScore> {
    let mut resource_kinds_used = 0i64;
    let mut ratio_sum = 0.0;
    let mut ratio_count = 0i64;

    for (resource, qty) in bundle {
        if SchedulerConfig::is_implicit_resource(resource) {
            // Implicit resources never block placement, but still count
            // toward "kinds used" so an implicit-only request still scores
            // and triggers a launch.
            resource_kinds_used += 1;
            continue;
        }
        let Some(total) = candidate.resources.get(resource).copied() else {
            return None;
        };
        if total < *qty {
            return None;
        }
        resource_kinds_used += 1;
        if total > 0.0 {
            ratio_sum += qty / total;
            ratio_count += 1;
        }
    }

    let utilization_ratio = if ratio_count == 0 {
        0.0
    } else {
        ratio_sum / ratio_count as f64
    };

    let has_gpu = candidate
        .resources
        .keys()
        .any(|r| r == "GPU" && candidate.resources[r] > 0.0);
    let wants_gpu = bundle.get("GPU").copied().unwrap_or(0.0) > 0.0;
    let gpu_conservation_ok = !(config.conserve_gpu_nodes && has_gpu && !wants_gpu);

    Some(NodeTypeScore {
        resource_kinds_used,
        gpu_conservation_ok,
        utilization_ratio,
    })
}

/// Picks the best node type able to host `bundle`, among `candidates`
/// filtered to types that are still under their per-type/global caps by the
/// caller. Deterministic tie-break on type name ascending.
pub fn best_node_type<'a>(
    candidates: impl Iterator<Item = &'a NodeTypeConfig>,
    bundle: &ResourceMap,
    config: &SchedulerConfig,
) -> Option<&'a NodeTypeConfig> {
    let mut best: Option<(&NodeTypeConfig, NodeTypeScore)> = None;
    for candidate in candidates {
        let Some(score) = score_node_type(candidate, bundle, config) else {
            continue;
        };
        best = match best {
            None => Some((candidate, score)),
            Some((best_candidate, best_score)) => {
                match score.cmp_desc(&best_score) {
                    Ordering::Greater => Some((candidate, score)),
                    Ordering::Less => Some((best_candidate, best_score)),
                    Ordering::Equal => {
                        if candidate.name < best_candidate.name {
                            Some((candidate, score))
                        } else {
                            Some((best_candidate, best_score))
                        }
                    }
                }
            }
        };
    }
    best.map(|(candidate, _)| candidate)
}
