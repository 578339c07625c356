mod labels;
pub use labels::Labels;

mod pod_phase;
pub use pod_phase::PodPhase;

mod pod;
pub use pod::{ContainerState, ContainerStatus, Pod, PodStatus};

mod event;
pub use event::{JobEvent, LogLine};

/// Name of a pod as assigned by the orchestrator.
///
/// Identifies the pod within one watch session.
pub type PodName = String;

/// Label key used when a workload does not declare its own selector.
pub const LABEL_JOB_NAME: &str = "job-name";
