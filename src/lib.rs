//! Pure resource-demand scheduling for a Ray-style cluster autoscaler.
//!
//! [`ResourceDemandScheduler::schedule`] is the crate's single entry point:
//! given the node-type catalog, the cluster's current instances, and the
//! demand to reconcile (individual requests, gangs, and standing cluster
//! constraints), it returns which instances to launch and which to
//! terminate. The call is synchronous and side-effect free — no I/O, no
//! locks held across it, and calling it twice with the same input produces
//! the same output.

pub mod bounds;
pub mod config;
pub mod constraints;
pub mod demand;
pub mod error;
pub mod gang;
pub mod idle;
pub mod node;
pub mod reply;
pub mod scoring;
pub mod types;
pub mod util;

pub use config::SchedulerConfig;
pub use error::SchedulerError;
pub use reply::{
    ReplyTerminationCause, SchedulingReply, SchedulingRequest, TerminateInstanceRecord,
};
pub use types::{
    AutoscalerInstance, ClusterResourceConstraint, GangResourceRequest, ImInstance,
    InstanceStatus, NodeKind, NodeTypeConfig, PlacementConstraint, PlacementConstraintKind,
    RayNodeState, RayNodeStatus, ResourceMap, ResourceRequest,
};

use node::SchedulingNode;
use tracing::{info, instrument};

/// The scheduler itself. Stateless beyond its [`SchedulerConfig`] — every
/// call to [`schedule`](Self::schedule) starts from the request it's given.
#[derive(Debug, Clone, Default)]
pub struct ResourceDemandScheduler {
    config: SchedulerConfig,
}

impl ResourceDemandScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        Self { config }
    }

    /// Runs the full eight-stage pipeline over `request` and returns the
    /// scheduling decision. Never blocks; never mutates anything the caller
    /// didn't hand it by value.
    #[instrument(skip_all)]
    pub fn schedule(
        &self,
        request: SchedulingRequest,
    ) -> Result<SchedulingReply, SchedulerError> {
        for config in request.node_type_configs.values() {
            if config.min_worker_nodes > config.max_worker_nodes {
                return Err(SchedulerError::InvalidWorkerBounds {
                    node_type: config.name.clone(),
                    min: config.min_worker_nodes,
                    max: config.max_worker_nodes,
                });
            }
        }

        // Stage 1: ingest existing instances into the working node set.
        let mut nodes: Vec<SchedulingNode> = Vec::with_capacity(request.current_instances.len());
        for instance in &request.current_instances {
            if let Some(node) = SchedulingNode::new(
                instance,
                &request.node_type_configs,
                request.disable_launch_config_check,
            )? {
                nodes.push(node);
            }
        }
        info!(ingested = nodes.len(), "ingested existing instances");

        // Stage 2: mint pending nodes to satisfy min_worker_nodes.
        bounds::enforce_min_workers(&mut nodes, &request.node_type_configs, request.max_num_nodes);

        // Stage 3: terminate excess nodes over max_worker_nodes / max_num_nodes.
        bounds::enforce_max_workers(&mut nodes, &request.node_type_configs, request.max_num_nodes);

        // Stage 4: grow into any declared cluster resource constraints.
        let infeasible_cluster_resource_constraints = constraints::apply_constraints(
            &mut nodes,
            &request.cluster_resource_constraints,
            &request.node_type_configs,
            &self.config,
            request.max_num_nodes,
        );

        // Stage 5: place gangs atomically.
        let infeasible_gang_resource_requests = gang::schedule_gangs(
            &mut nodes,
            &request.gang_resource_requests,
            &request.node_type_configs,
            &self.config,
            request.max_num_nodes,
        );

        // Stage 6: place individual demand, ungrouping the (request, count)
        // pairs the caller supplied back into a flat list first.
        let infeasible_resource_requests = demand::schedule_demand(
            &mut nodes,
            util::ungroup(request.resource_requests),
            &request.node_type_configs,
            &self.config,
            request.max_num_nodes,
        );

        // Stage 7: idle termination, suppressed if any constraint is standing.
        let idle_timeout_ms = request
            .idle_timeout_s
            .unwrap_or(config::DEFAULT_IDLE_TIMEOUT_S)
            .saturating_mul(1000);
        idle::terminate_idle_nodes(
            &mut nodes,
            &request.node_type_configs,
            idle_timeout_ms,
            !request.cluster_resource_constraints.is_empty(),
        );

        for node in &nodes {
            if let Err(detail) = node.check_invariant() {
                return Err(SchedulerError::InvariantViolation { detail });
            }
        }

        // Stage 8: assemble the reply.
        Ok(reply::assemble_reply(
            &nodes,
            infeasible_resource_requests,
            infeasible_gang_resource_requests,
            infeasible_cluster_resource_constraints,
        ))
    }
}
