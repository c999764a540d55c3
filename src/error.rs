//! Error taxonomy for the resource demand scheduler.
//!
//! Per the error handling design: infeasible demand is never an error, it is
//! always captured in [`crate::reply::SchedulingReply`]'s infeasible lists.
//! Only programmer/config errors and invariant violations are fatal.

use thiserror::Error;

/// Fatal errors produced by [`crate::ResourceDemandScheduler::schedule`].
///
/// None of these are raised for ordinary scheduling shortfalls -- those
/// surface as infeasibility lists in the reply instead.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum SchedulerError {
    /// A demand referenced a node type absent from the catalog while
    /// `disable_launch_config_check` was false.
    #[error("demand {demand} references unknown node type {node_type}")]
    UnknownNodeType { demand: String, node_type: String },

    /// `min_worker_nodes > max_worker_nodes` for some node type.
    #[error(
        "node type {node_type} has min_worker_nodes ({min}) greater than max_worker_nodes ({max})"
    )]
    InvalidWorkerBounds {
        node_type: String,
        min: u64,
        max: u64,
    },

    /// A scheduling node was found with a negative resource balance or an
    /// inconsistent status at a stage boundary.
    #[error("scheduling invariant violated: {detail}")]
    InvariantViolation { detail: String },
}
