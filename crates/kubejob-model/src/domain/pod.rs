use serde::{Deserialize, Serialize};

use crate::{Labels, PodPhase};

/// Sub-state of one container inside a pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContainerState {
    /// Not running yet; `reason` explains why (e.g. `"ContainerCreating"`).
    Waiting { reason: String },
    Running,
    #[serde(rename_all = "camelCase")]
    Terminated {
        /// Exit code, absent when the process was killed by a signal or never started.
        #[serde(skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl ContainerState {
    pub fn waiting(reason: impl Into<String>) -> Self {
        ContainerState::Waiting {
            reason: reason.into(),
        }
    }

    /// Returns the waiting reason, if the container is waiting.
    pub fn waiting_reason(&self) -> Option<&str> {
        match self {
            ContainerState::Waiting { reason } => Some(reason),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStatus {
    pub name: String,
    pub state: ContainerState,
}

/// Observed status of a pod, delivered with every watch notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodStatus {
    pub phase: PodPhase,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub container_statuses: Vec<ContainerStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PodStatus {
    pub fn new(phase: PodPhase) -> Self {
        Self {
            phase,
            container_statuses: Vec::new(),
            message: None,
        }
    }

    /// Iterate over `(container, reason)` for every waiting container.
    pub fn waiting(&self) -> impl Iterator<Item = (&str, &str)> {
        self.container_statuses
            .iter()
            .filter_map(|cs| cs.state.waiting_reason().map(|r| (cs.name.as_str(), r)))
    }
}

/// Runtime instantiation of a workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub labels: Labels,
    /// Declared container names, in declaration order.
    pub containers: Vec<String>,
    pub status: PodStatus,
}

impl Pod {
    #[inline]
    pub fn phase(&self) -> PodPhase {
        self.status.phase
    }
}
