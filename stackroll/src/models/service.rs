//! Observed service state

use serde::{Deserialize, Serialize};

/// Snapshot of one service as reported by the orchestrator.
///
/// Produced fresh on every poll and never mutated by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceState {
    /// Service name (unqualified)
    pub service: String,

    /// Replicas the orchestrator is trying to run
    pub desired: u32,

    /// Replicas currently running
    pub current: u32,

    /// Image reference the service is configured with
    pub image: Option<String>,

    /// Errors reported by tasks that are not running
    #[serde(default)]
    pub task_errors: Vec<String>,
}

impl ServiceState {
    /// Running count matches the desired count
    pub fn is_converged(&self) -> bool {
        self.desired == self.current
    }
}
