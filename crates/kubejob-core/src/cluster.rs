//! Contract between the job runner and the orchestrator it drives.
//!
//! The runner never talks to an orchestrator directly; everything goes through [`Cluster`].
//! Implementations are expected to be cheap to share behind an `Arc`.

use std::pin::Pin;

use async_trait::async_trait;
use tokio::{io::AsyncRead, sync::mpsc};

use kubejob_model::{Pod, Workload};

use crate::error::ClusterError;

/// Follow-mode byte stream of one container's output.
pub type LogReader = Pin<Box<dyn AsyncRead + Send>>;

/// Long-lived subscription to pod notifications.
///
/// Delivers at least the current state on subscribe and every change afterwards.
/// The current phase may be redelivered. Dropping the watch stops the subscription.
pub struct PodWatch {
    rx: mpsc::Receiver<Pod>,
}

impl PodWatch {
    pub fn new(rx: mpsc::Receiver<Pod>) -> Self {
        Self { rx }
    }

    /// Create a watch together with the sender feeding it.
    pub fn channel(capacity: usize) -> (mpsc::Sender<Pod>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(rx))
    }

    /// Next notification; `None` once the orchestrator closed the subscription.
    pub async fn next(&mut self) -> Option<Pod> {
        self.rx.recv().await
    }
}

#[async_trait]
pub trait Cluster: Send + Sync + 'static {
    /// Create the workload in `namespace` and return it as stored by the orchestrator.
    async fn submit(&self, namespace: &str, workload: &Workload) -> Result<Workload, ClusterError>;

    /// Subscribe to the pods of `namespace` matching the label query `selector`.
    async fn watch_pods(&self, namespace: &str, selector: &str) -> Result<PodWatch, ClusterError>;

    /// Open a follow-mode read of one container's output.
    ///
    /// `container` is empty when the pod has exactly one container.
    /// The stream ends cleanly once the container terminated and its output is exhausted.
    async fn open_log_stream(&self, pod: &Pod, container: &str) -> Result<LogReader, ClusterError>;

    /// Remove the workload and its pods.
    async fn delete(&self, workload: &Workload) -> Result<(), ClusterError>;
}
