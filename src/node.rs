//! [`SchedulingNode`]: the working entity the pipeline mutates, plus the
//! ingest step (`SchedulingNode::new`) that turns one [`AutoscalerInstance`]
//! into either nothing, a doomed node, or a schedulable one.

use std::collections::BTreeMap;

use tracing::trace;

use crate::error::SchedulerError;
use crate::types::{
    AutoscalerInstance, NodeKind, NodeTypeConfig, RayNodeStatus, ResourceMap,
};

/// The two independent accounting views a node's spare capacity is tracked
/// under. Constraints never consume demand's view and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceRequestSource {
    PendingDemand,
    ClusterResourceConstraint,
}

/// Why a node was marked for termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationCause {
    Outdated,
    MaxNumNodePerType,
    MaxNumNodes,
    Idle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminationRequest {
    pub cause: TerminationCause,
}

/// Status of a [`SchedulingNode`] within one `schedule()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingNodeStatus {
    Schedulable,
    ToTerminate,
    Scheduled,
}

/// The entity the pipeline allocates demand onto and picks victims from.
/// Lives only for the duration of one `schedule()` call.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulingNode {
    pub node_type: String,
    pub node_kind: NodeKind,
    pub total_resources: ResourceMap,
    pub labels: BTreeMap<String, String>,
    pub launch_config_hash: String,

    pub available_resources_for_sched: BTreeMap<ResourceRequestSource, ResourceMap>,

    pub status: SchedulingNodeStatus,
    pub termination_request: Option<TerminationRequest>,

    pub ray_node_id: String,
    pub im_instance_id: String,
    pub idle_duration_ms: u64,
    pub ray_status: Option<RayNodeStatus>,

    /// True for a node minted by the pipeline this call (no backing
    /// instance yet); false for anything derived from an existing
    /// [`AutoscalerInstance`].
    pub pending: bool,
}

impl SchedulingNode {
    /// Mint a fresh "pending" node of `node_type` representing a future
    /// launch. Used by stages 2, 4, 5, and 6.
    pub fn new_pending(config: &NodeTypeConfig) -> Self {
        let mut views = BTreeMap::new();
        views.insert(
            ResourceRequestSource::PendingDemand,
            config.resources.clone(),
        );
        views.insert(
            ResourceRequestSource::ClusterResourceConstraint,
            config.resources.clone(),
        );

        Self {
            node_type: config.name.clone(),
            node_kind: NodeKind::Worker,
            total_resources: config.resources.clone(),
            labels: config.labels.clone(),
            launch_config_hash: config.launch_config_hash.clone(),
            available_resources_for_sched: views,
            status: SchedulingNodeStatus::Schedulable,
            termination_request: None,
            ray_node_id: String::new(),
            im_instance_id: String::new(),
            idle_duration_ms: 0,
            ray_status: None,
            pending: true,
        }
    }

    /// Ingest one instance (§4.1). Returns `Ok(None)` if the instance carries
    /// no `im_instance` record or its lifecycle status is not schedulable-
    /// relevant, or its type isn't in the catalog and the launch-config
    /// check is disabled. Fails the whole call with
    /// [`SchedulerError::UnknownNodeType`] if a head instance references a
    /// type absent from the catalog while the check is enabled — a worker in
    /// the same situation is simply marked outdated instead, since the
    /// autoscaler can just replace it, but there is only ever one head.
    pub fn new(
        instance: &AutoscalerInstance,
        node_type_configs: &BTreeMap<String, NodeTypeConfig>,
        disable_launch_config_check: bool,
    ) -> Result<Option<Self>, SchedulerError> {
        let Some(im) = instance.im_instance.as_ref() else {
            return Ok(None);
        };

        if !im.status.is_lifecycle_relevant() {
            trace!(instance_id = %im.instance_id, ?im.status, "instance not lifecycle-relevant, dropping");
            return Ok(None);
        }

        let catalog_config = node_type_configs.get(&im.instance_type);

        if catalog_config.is_none() && disable_launch_config_check {
            trace!(instance_id = %im.instance_id, node_type = %im.instance_type, "unknown type, launch-config check disabled, dropping");
            return Ok(None);
        }

        let is_head = im.node_kind == NodeKind::Head;

        // Outdated: type no longer in catalog (worker only).
        if catalog_config.is_none() && !is_head {
            return Ok(Some(Self::outdated(instance, im, TerminationCause::Outdated)));
        }

        let catalog_config = match catalog_config {
            Some(c) => c.clone(),
            None => {
                return Err(SchedulerError::UnknownNodeType {
                    demand: im.instance_id.clone(),
                    node_type: im.instance_type.clone(),
                });
            }
        };

        // Outdated: launch config hash mismatch (worker only).
        if !is_head
            && !disable_launch_config_check
            && im.launch_config_hash != catalog_config.launch_config_hash
        {
            return Ok(Some(Self::outdated(instance, im, TerminationCause::Outdated)));
        }

        let total_resources = catalog_config.resources.clone();

        let pending_view = match &instance.ray_node {
            Some(ray_node) => ray_node.available_resources.clone(),
            None => total_resources.clone(),
        };
        let constraint_view = total_resources.clone();

        let mut labels = catalog_config.labels.clone();
        if let Some(ray_node) = &instance.ray_node {
            for (k, v) in &ray_node.dynamic_labels {
                labels.insert(k.clone(), v.clone());
            }
        }

        let mut views = BTreeMap::new();
        views.insert(ResourceRequestSource::PendingDemand, pending_view);
        views.insert(ResourceRequestSource::ClusterResourceConstraint, constraint_view);

        Ok(Some(Self {
            node_type: im.instance_type.clone(),
            node_kind: im.node_kind,
            total_resources,
            labels,
            launch_config_hash: catalog_config.launch_config_hash.clone(),
            available_resources_for_sched: views,
            status: SchedulingNodeStatus::Schedulable,
            termination_request: None,
            ray_node_id: instance
                .ray_node
                .as_ref()
                .map(|r| r.node_id.clone())
                .unwrap_or_default(),
            im_instance_id: im.instance_id.clone(),
            idle_duration_ms: instance
                .ray_node
                .as_ref()
                .map(|r| r.idle_duration_ms)
                .unwrap_or(0),
            ray_status: instance.ray_node.as_ref().map(|r| r.status),
            pending: false,
        }))
    }

    fn outdated(
        instance: &AutoscalerInstance,
        im: &crate::types::ImInstance,
        cause: TerminationCause,
    ) -> Self {
        Self {
            node_type: im.instance_type.clone(),
            node_kind: im.node_kind,
            total_resources: ResourceMap::new(),
            labels: BTreeMap::new(),
            launch_config_hash: im.launch_config_hash.clone(),
            available_resources_for_sched: BTreeMap::new(),
            status: SchedulingNodeStatus::ToTerminate,
            termination_request: Some(TerminationRequest { cause }),
            ray_node_id: instance
                .ray_node
                .as_ref()
                .map(|r| r.node_id.clone())
                .unwrap_or_default(),
            im_instance_id: im.instance_id.clone(),
            idle_duration_ms: 0,
            ray_status: instance.ray_node.as_ref().map(|r| r.status),
            pending: false,
        }
    }

    pub fn is_head(&self) -> bool {
        self.node_kind == NodeKind::Head
    }

    pub fn is_running(&self) -> bool {
        matches!(self.ray_status, Some(RayNodeStatus::Running) | Some(RayNodeStatus::Idle))
    }

    /// Fraction of `total_resources` in use, averaged over dimensions with a
    /// positive total. Used for victim selection and bin-packing tie-breaks.
    pub fn utilization_score(&self, source: ResourceRequestSource) -> f64 {
        let Some(available) = self.available_resources_for_sched.get(&source) else {
            return 0.0;
        };
        let mut sum = 0.0;
        let mut count = 0usize;
        for (resource, total) in &self.total_resources {
            if *total <= 0.0 {
                continue;
            }
            let avail = available.get(resource).copied().unwrap_or(0.0);
            let used = (*total - avail).max(0.0);
            sum += used / *total;
            count += 1;
        }
        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }

    /// Checks whether `bundle` fits within this node's available resources
    /// for `source`, ignoring implicit resources (treated as infinite).
    pub fn fits(&self, bundle: &ResourceMap, source: ResourceRequestSource) -> bool {
        let Some(available) = self.available_resources_for_sched.get(&source) else {
            return false;
        };
        bundle.iter().all(|(resource, qty)| {
            if crate::config::SchedulerConfig::is_implicit_resource(resource) {
                return true;
            }
            available.get(resource).copied().unwrap_or(0.0) >= *qty
        })
    }

    /// Deducts `bundle` from this node's available resources for `source`.
    /// Caller must have verified `fits` first.
    pub fn allocate(&mut self, bundle: &ResourceMap, source: ResourceRequestSource) {
        let Some(available) = self.available_resources_for_sched.get_mut(&source) else {
            return;
        };
        for (resource, qty) in bundle {
            if crate::config::SchedulerConfig::is_implicit_resource(resource) {
                continue;
            }
            if let Some(slot) = available.get_mut(resource) {
                *slot = (*slot - *qty).max(0.0);
            }
        }
    }

    /// Checks the invariant `0 <= available <= total` for every resource and
    /// every source on this node.
    pub fn check_invariant(&self) -> Result<(), String> {
        for (source, available) in &self.available_resources_for_sched {
            for (resource, qty) in available {
                if *qty < -1e-9 {
                    return Err(format!(
                        "node {} has negative available {:?} for {:?}: {}",
                        self.im_instance_id, resource, source, qty
                    ));
                }
                let total = self.total_resources.get(resource).copied().unwrap_or(0.0);
                if *qty > total + 1e-9 {
                    return Err(format!(
                        "node {} has available {:?} ({}) exceeding total ({}) for {:?}",
                        self.im_instance_id, resource, qty, total, source
                    ));
                }
            }
        }
        Ok(())
    }
}
