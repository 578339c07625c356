use serde::{Deserialize, Serialize};

use crate::PodStatus;

/// One line of output attributed to one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    /// Container name; empty when the pod has exactly one container.
    pub container: String,
    /// Line content without its terminator.
    pub line: String,
}

impl LogLine {
    pub fn new(container: impl Into<String>, line: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            line: line.into(),
        }
    }
}

/// Something that happened while a job was being watched.
///
/// Delivered on the optional events channel of a job run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum JobEvent {
    /// A pod status notification, forwarded as received (duplicates included).
    Status(PodStatus),
    /// A line of container output.
    Log(LogLine),
    /// A non-fatal asynchronous error, e.g. a failed log stream.
    Error(String),
}
