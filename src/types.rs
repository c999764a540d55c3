//! Core data model: node type catalog, demand shapes, and the instance
//! manager's view of live instances.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A resource bundle: resource name -> quantity. `BTreeMap` so that
/// iteration order is deterministic wherever a decision depends on it.
pub type ResourceMap = BTreeMap<String, f64>;

/// Immutable descriptor of a provisionable node type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeTypeConfig {
    pub name: String,
    pub resources: ResourceMap,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub min_worker_nodes: u64,
    pub max_worker_nodes: u64,
    #[serde(default)]
    pub launch_config_hash: String,
}

/// Kind of placement constraint within a [`ResourceRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlacementConstraintKind {
    Affinity,
    AntiAffinity,
}

/// One AFFINITY/ANTI_AFFINITY rule: match on `(label_key, label_value)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementConstraint {
    pub kind: PlacementConstraintKind,
    pub label_key: String,
    pub label_value: String,
}

/// A single bundle of required resources, with optional placement rules.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub resources_bundle: ResourceMap,
    #[serde(default)]
    pub placement_constraints: Vec<PlacementConstraint>,
}

impl ResourceRequest {
    pub fn new(resources_bundle: ResourceMap) -> Self {
        Self {
            resources_bundle,
            placement_constraints: Vec::new(),
        }
    }

    pub fn with_constraints(
        resources_bundle: ResourceMap,
        placement_constraints: Vec<PlacementConstraint>,
    ) -> Self {
        Self {
            resources_bundle,
            placement_constraints,
        }
    }
}

/// A list of [`ResourceRequest`]s that must be placed atomically as a unit.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GangResourceRequest {
    pub requests: Vec<ResourceRequest>,
}

/// A multiset of bundles that the cluster must be able to host
/// simultaneously. This is a floor, not demand that consumes capacity.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClusterResourceConstraint {
    /// Each entry is (bundle, count).
    pub min_bundles: Vec<(ResourceRequest, u64)>,
}

/// Cloud-instance lifecycle status, as tracked by the Instance Manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceStatus {
    Unknown,
    Queued,
    Requested,
    Allocated,
    RayInstalling,
    RayRunning,
    RayStopRequested,
    RayStopping,
    RayStopped,
    Terminating,
    Terminated,
    AllocationFailed,
    RayInstallFailed,
    TerminationFailed,
}

impl InstanceStatus {
    /// Statuses that yield a SCHEDULABLE (or TO_TERMINATE) node; everything
    /// else yields no node at all.
    pub fn is_lifecycle_relevant(self) -> bool {
        !matches!(
            self,
            InstanceStatus::Unknown
                | InstanceStatus::RayStopping
                | InstanceStatus::RayStopped
                | InstanceStatus::Terminating
                | InstanceStatus::Terminated
                | InstanceStatus::AllocationFailed
                | InstanceStatus::RayInstallFailed
                | InstanceStatus::TerminationFailed
        )
    }
}

/// Whether an instance is the cluster's head node or an ordinary worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Head,
    Worker,
}

/// The Instance Manager's lifecycle record for one instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImInstance {
    pub instance_id: String,
    pub instance_type: String,
    pub status: InstanceStatus,
    #[serde(default)]
    pub launch_config_hash: String,
    pub node_kind: NodeKind,
}

/// Ray's own runtime status for a live node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RayNodeStatus {
    Running,
    Idle,
    Dead,
}

/// Ray's runtime-state view of a node, when one exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RayNodeState {
    pub node_id: String,
    pub total_resources: ResourceMap,
    pub available_resources: ResourceMap,
    pub idle_duration_ms: u64,
    pub status: RayNodeStatus,
    #[serde(default)]
    pub dynamic_labels: BTreeMap<String, String>,
}

/// The scheduler's view of one instance: the Instance Manager record plus an
/// optional Ray runtime-state record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoscalerInstance {
    pub im_instance: Option<ImInstance>,
    pub ray_node: Option<RayNodeState>,
}
