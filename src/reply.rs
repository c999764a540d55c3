//! Request/reply envelope (§5) and final assembly (§4.8): turns the
//! post-pipeline node set plus the infeasible lists accumulated along the
//! way into the caller-facing [`SchedulingReply`].

use serde::{Deserialize, Serialize};

use crate::node::{SchedulingNode, SchedulingNodeStatus, TerminationCause};
use crate::types::{
    AutoscalerInstance, ClusterResourceConstraint, GangResourceRequest, NodeTypeConfig,
    ResourceRequest,
};
use std::collections::BTreeMap;

/// Everything `schedule()` needs: the node-type catalog, the cluster's
/// current instances, and the demand to reconcile against them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulingRequest {
    pub node_type_configs: BTreeMap<String, NodeTypeConfig>,
    #[serde(default)]
    pub current_instances: Vec<AutoscalerInstance>,
    /// Grouped as `(request, count)` pairs, mirroring
    /// `ResourceRequestUtil.group_by_count` upstream; use [`crate::util`] to
    /// fold a flat list of requests into this form.
    #[serde(default)]
    pub resource_requests: Vec<(ResourceRequest, u64)>,
    #[serde(default)]
    pub gang_resource_requests: Vec<GangResourceRequest>,
    #[serde(default)]
    pub cluster_resource_constraints: Vec<ClusterResourceConstraint>,
    #[serde(default)]
    pub max_num_nodes: Option<u64>,
    /// How long (in seconds) a node must report as idle before it becomes
    /// eligible for idle termination this call. Defaults to
    /// [`crate::config::DEFAULT_IDLE_TIMEOUT_S`] when unset, since this is a
    /// per-call knob rather than scheduler-wide state.
    #[serde(default)]
    pub idle_timeout_s: Option<u64>,
    /// When true, instances of a type no longer in the catalog are dropped
    /// silently instead of being marked outdated.
    #[serde(default)]
    pub disable_launch_config_check: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyTerminationCause {
    Outdated,
    MaxNumNodePerType,
    MaxNumNodes,
    Idle,
}

impl From<TerminationCause> for ReplyTerminationCause {
    fn from(cause: TerminationCause) -> Self {
        match cause {
            TerminationCause::Outdated => ReplyTerminationCause::Outdated,
            TerminationCause::MaxNumNodePerType => ReplyTerminationCause::MaxNumNodePerType,
            TerminationCause::MaxNumNodes => ReplyTerminationCause::MaxNumNodes,
            TerminationCause::Idle => ReplyTerminationCause::Idle,
        }
    }
}

/// A single instance the caller should tear down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminateInstanceRecord {
    pub instance_id: String,
    #[serde(default)]
    pub ray_node_id: String,
    pub cause: ReplyTerminationCause,
}

/// The scheduler's complete recommendation for this call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulingReply {
    /// Node types to launch, grouped by type name, with how many of each.
    pub to_launch: BTreeMap<String, u64>,
    pub to_terminate: Vec<TerminateInstanceRecord>,

    pub infeasible_resource_requests: Vec<ResourceRequest>,
    pub infeasible_gang_resource_requests: Vec<GangResourceRequest>,
    pub infeasible_cluster_resource_constraints: Vec<ClusterResourceConstraint>,
}

/// Builds the final reply from the pipeline's terminal node set.
pub fn assemble_reply(
    nodes: &[SchedulingNode],
    infeasible_resource_requests: Vec<ResourceRequest>,
    infeasible_gang_resource_requests: Vec<GangResourceRequest>,
    infeasible_cluster_resource_constraints: Vec<ClusterResourceConstraint>,
) -> SchedulingReply {
    let mut to_launch: BTreeMap<String, u64> = BTreeMap::new();
    let mut to_terminate = Vec::new();

    for node in nodes {
        if node.pending && node.status != SchedulingNodeStatus::ToTerminate {
            *to_launch.entry(node.node_type.clone()).or_insert(0) += 1;
            continue;
        }
        if node.status == SchedulingNodeStatus::ToTerminate && !node.im_instance_id.is_empty() {
            let cause = node
                .termination_request
                .as_ref()
                .map(|t| t.cause.into())
                .unwrap_or(ReplyTerminationCause::Idle);
            to_terminate.push(TerminateInstanceRecord {
                instance_id: node.im_instance_id.clone(),
                ray_node_id: node.ray_node_id.clone(),
                cause,
            });
        }
    }

    SchedulingReply {
        to_launch,
        to_terminate,
        infeasible_resource_requests,
        infeasible_gang_resource_requests,
        infeasible_cluster_resource_constraints,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{ResourceRequestSource, TerminationRequest};
    use crate::types::{NodeKind, ResourceMap};

    fn pending_node(node_type: &str) -> SchedulingNode {
        let cfg = NodeTypeConfig {
            name: node_type.into(),
            resources: ResourceMap::new(),
            labels: BTreeMap::new(),
            min_worker_nodes: 0,
            max_worker_nodes: 10,
            launch_config_hash: String::new(),
        };
        SchedulingNode::new_pending(&cfg)
    }

    fn existing_node(id: &str, terminate: bool) -> SchedulingNode {
        let mut views = BTreeMap::new();
        views.insert(ResourceRequestSource::PendingDemand, ResourceMap::new());
        views.insert(ResourceRequestSource::ClusterResourceConstraint, ResourceMap::new());
        SchedulingNode {
            node_type: "type_1".into(),
            node_kind: NodeKind::Worker,
            total_resources: ResourceMap::new(),
            labels: BTreeMap::new(),
            launch_config_hash: String::new(),
            available_resources_for_sched: views,
            status: if terminate {
                SchedulingNodeStatus::ToTerminate
            } else {
                SchedulingNodeStatus::Schedulable
            },
            termination_request: terminate.then_some(TerminationRequest {
                cause: TerminationCause::Idle,
            }),
            ray_node_id: format!("r{id}"),
            im_instance_id: id.to_string(),
            idle_duration_ms: 0,
            ray_status: None,
            pending: false,
        }
    }

    #[test]
    fn groups_to_launch_by_type_and_counts_to_terminate() {
        let nodes = vec![
            pending_node("type_a"),
            pending_node("type_a"),
            pending_node("type_b"),
            existing_node("0", true),
            existing_node("1", false),
        ];
        let reply = assemble_reply(&nodes, Vec::new(), Vec::new(), Vec::new());
        assert_eq!(reply.to_launch["type_a"], 2);
        assert_eq!(reply.to_launch["type_b"], 1);
        assert_eq!(reply.to_terminate.len(), 1);
        assert_eq!(reply.to_terminate[0].instance_id, "0");
        assert_eq!(reply.to_terminate[0].cause, ReplyTerminationCause::Idle);
    }
}
