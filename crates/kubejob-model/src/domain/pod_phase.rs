use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse lifecycle state of a pod as reported by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PodPhase {
    /// Accepted, but not all containers have been started yet.
    Pending,
    /// All containers have been started and at least one is still running.
    Running,
    /// All containers terminated successfully.
    Succeeded,
    /// All containers terminated and at least one failed.
    Failed,
    /// State could not be obtained.
    Unknown,
}

impl PodPhase {
    /// Returns `true` if the pod won't transition further.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PodPhase::Succeeded | PodPhase::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PodPhase::Pending => "Pending",
            PodPhase::Running => "Running",
            PodPhase::Succeeded => "Succeeded",
            PodPhase::Failed => "Failed",
            PodPhase::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
