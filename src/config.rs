//! Scheduler-wide configuration flags.

use serde::{Deserialize, Serialize};

/// Prefix identifying an "implicit" resource: a dimension treated as
/// infinite capacity on every node. Stands in for the native
/// `ray._raylet.IMPLICIT_RESOURCE_PREFIX` constant.
pub const IMPLICIT_RESOURCE_PREFIX: &str = "implicit_resource_";

/// Idle timeout applied when a [`crate::reply::SchedulingRequest`] leaves
/// `idle_timeout_s` unset.
pub const DEFAULT_IDLE_TIMEOUT_S: u64 = 60;

/// Behavioral knobs for a [`crate::ResourceDemandScheduler`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// When true, a node type that carries any GPU resource is penalized as
    /// a launch candidate for a request that does not itself demand GPU.
    pub conserve_gpu_nodes: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            conserve_gpu_nodes: true,
        }
    }
}

impl SchedulerConfig {
    pub fn is_implicit_resource(name: &str) -> bool {
        name.starts_with(IMPLICIT_RESOURCE_PREFIX)
    }
}
