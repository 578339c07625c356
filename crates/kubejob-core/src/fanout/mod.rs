//! Fan-out of one streamer per container and fan-in of their completion.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info};

use kubejob_model::Pod;

use crate::{Cluster, LogSinks, stream::run_streamer};

/// One-shot signal fired once every streamer of a pod has exited.
pub struct DrainSignal {
    rx: Option<oneshot::Receiver<()>>,
}

impl DrainSignal {
    /// Wait until the signal fires. Returns immediately once it has.
    ///
    /// Cancel-safe: dropping the future keeps the signal armed.
    pub async fn wait(&mut self) {
        if let Some(rx) = self.rx.as_mut() {
            // A dropped sender means the runtime is going away; nothing left to wait for.
            let _ = rx.await;
            self.rx = None;
        }
    }

    /// Non-blocking check.
    pub fn is_drained(&mut self) -> bool {
        match self.rx.as_mut().map(|rx| rx.try_recv()) {
            None => true,
            Some(Err(oneshot::error::TryRecvError::Empty)) => false,
            Some(_) => {
                self.rx = None;
                true
            }
        }
    }
}

/// `(container, label)` pairs to stream for a pod's declared containers.
///
/// A single container is streamed without disambiguation: empty container name, empty label.
pub fn stream_targets(containers: &[String]) -> Vec<(String, String)> {
    match containers {
        [_] => vec![(String::new(), String::new())],
        many => many.iter().map(|c| (c.clone(), format!("{c}: "))).collect(),
    }
}

/// Spawns log streamers and tracks them until shutdown.
///
/// Does not deduplicate by pod; calling [`LogFanout::start`] twice for one pod duplicates every line.
pub struct LogFanout<C: ?Sized> {
    cluster: Arc<C>,
    sinks: LogSinks,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl<C> LogFanout<C>
where
    C: Cluster + ?Sized,
{
    /// `cancel` stops every streamer spawned by this fan-out.
    pub fn new(cluster: Arc<C>, sinks: LogSinks, cancel: CancellationToken) -> Self {
        Self {
            cluster,
            sinks,
            cancel,
            tracker: TaskTracker::new(),
        }
    }

    /// Spawn one streamer per container of `pod`.
    ///
    /// The returned signal fires exactly once, after the last of these streamers exited,
    /// whatever the completion order and even if they all finish before anyone waits.
    pub fn start(&mut self, pod: &Pod) -> DrainSignal {
        let targets = stream_targets(&pod.containers);
        info!(target: "kubejob.fanout", pod = %pod.name, streams = targets.len(), "starting log streaming");

        let group = TaskTracker::new();
        for (container, label) in targets {
            let cluster = Arc::clone(&self.cluster);
            let sinks = self.sinks.clone();
            let cancel = self.cancel.clone();
            let pod = pod.clone();

            let streamer = async move {
                run_streamer(&*cluster, &pod, &container, label, &sinks, &cancel).await;
            };
            group.spawn(self.tracker.track_future(streamer));
        }
        group.close();

        let (tx, rx) = oneshot::channel();
        let pod_name = pod.name.clone();
        self.tracker.spawn(async move {
            group.wait().await;
            debug!(target: "kubejob.fanout", pod = %pod_name, "all log streams drained");
            let _ = tx.send(());
        });

        DrainSignal { rx: Some(rx) }
    }

    /// Stop every streamer and wait for all of them to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        debug!(target: "kubejob.fanout", "log streamers stopped");
    }
}
