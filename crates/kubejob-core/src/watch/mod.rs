//! Lifecycle watcher: turns pod notifications and log streams into one [`Outcome`].
//!
//! A session subscribes to the pods matching the job selector and acts on phase transitions:
//! - `Running` starts log streaming (once per pod);
//! - `Succeeded`/`Failed` start log streaming if not yet started, fix the success value and
//!   move on to waiting for the log streams to drain;
//! - `Pending`/`Unknown` only report why containers are waiting.
//!
//! Draining is bounded by the drain timeout, so an endless stream cannot hang the session.
//! Cancellation and the overall deadline cut the session short at any point.

mod phase;
pub use phase::PhaseTracker;

use std::{collections::HashSet, future::Future, pin::Pin, sync::Arc, time::Duration};

use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use kubejob_model::{JobEvent, Pod, PodName, PodPhase, Workload};

use crate::{
    Cluster, DrainSignal, JobError, LogFanout, LogSinks, PodWatch,
    stream::{Delivery, deliver},
};

/// How long to wait for log streams after a terminal phase.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub drain_timeout: Duration,
    /// Overall limit for the session; `None` waits forever.
    pub timeout: Option<Duration>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            timeout: None,
        }
    }
}

/// Terminal result of a job run.
///
/// `error` may accompany `success == true` when the job succeeded but the session could not
/// confirm that all output was delivered (drain timeout, cancellation while draining).
#[derive(Debug)]
pub struct Outcome {
    pub success: bool,
    pub error: Option<JobError>,
}

impl Outcome {
    pub fn failed(error: JobError) -> Self {
        Self {
            success: false,
            error: Some(error),
        }
    }
}

enum Ending {
    Terminal { success: bool },
    Interrupted(JobError),
}

/// One watch session over the pods of a job.
pub struct Watcher<C: ?Sized> {
    cluster: Arc<C>,
    config: WatchConfig,
    sinks: LogSinks,
}

impl<C> Watcher<C>
where
    C: Cluster + ?Sized,
{
    pub fn new(cluster: Arc<C>, config: WatchConfig, sinks: LogSinks) -> Self {
        Self {
            cluster,
            config,
            sinks,
        }
    }

    /// Watch `job` until it reaches a terminal phase and its logs drained, or the session is cut short.
    ///
    /// On return the subscription is closed, every streamer has exited and the events channel
    /// (if any) has been closed.
    #[instrument(level = "debug", skip_all, fields(job = %job.name, namespace = %job.namespace))]
    pub async fn watch(self, cancel: CancellationToken, job: &Workload) -> Outcome {
        let Watcher {
            cluster,
            config,
            sinks,
        } = self;

        let selector = job.selector.selector();
        debug!(target: "kubejob.watch", %selector, "subscribing to pod notifications");

        let outcome = match cluster.watch_pods(&job.namespace, &selector).await {
            Err(e) => {
                warn!(target: "kubejob.watch", error = %e, "unable to watch");
                Outcome::failed(JobError::Watch(e))
            }
            Ok(watch) => {
                // Independent of `cancel`; streamers are stopped by `Session::finish`.
                let fanout = LogFanout::new(cluster, sinks.clone(), CancellationToken::new());
                let mut session = Session {
                    events: sinks.events.clone(),
                    listening: !sinks.is_empty(),
                    fanout,
                    phase: PhaseTracker::new(),
                    pod: None,
                    streaming: HashSet::new(),
                    drain: None,
                };

                let deadline = config.timeout.map(|t| Instant::now() + t);
                let expired = expire_at(deadline);
                tokio::pin!(expired);

                let outcome = session.run(watch, &cancel, &config, expired).await;
                session.finish().await;
                outcome
            }
        };
        drop(sinks);

        match &outcome.error {
            None => info!(target: "kubejob.watch", success = outcome.success, "watch finished"),
            Some(e) => info!(target: "kubejob.watch", success = outcome.success, error = %e, "watch finished"),
        }
        outcome
    }
}

struct Session<C: ?Sized> {
    events: Option<tokio::sync::mpsc::Sender<JobEvent>>,
    listening: bool,
    fanout: LogFanout<C>,
    phase: PhaseTracker,
    /// The single pod this session follows.
    pod: Option<PodName>,
    /// Pods whose logs are being streamed. Owned by the session task only.
    streaming: HashSet<PodName>,
    drain: Option<DrainSignal>,
}

impl<C> Session<C>
where
    C: Cluster + ?Sized,
{
    async fn run<F>(
        &mut self,
        mut watch: PodWatch,
        cancel: &CancellationToken,
        config: &WatchConfig,
        mut expired: Pin<&mut F>,
    ) -> Outcome
    where
        F: Future<Output = ()>,
    {
        let deadline_err = || JobError::DeadlineExceeded(config.timeout.unwrap_or_default());

        let ending = loop {
            let pod = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ending::Interrupted(JobError::Cancelled),
                _ = expired.as_mut() => break Ending::Interrupted(deadline_err()),
                next = watch.next() => match next {
                    Some(pod) => pod,
                    None => break Ending::Interrupted(JobError::WatchClosed),
                },
            };
            if let Some(ending) = self.on_pod(pod, cancel).await {
                break ending;
            }
        };
        drop(watch);

        match ending {
            Ending::Interrupted(e) => Outcome::failed(e),
            Ending::Terminal { success } => {
                let error = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Some(JobError::Cancelled),
                    _ = expired.as_mut() => Some(deadline_err()),
                    _ = self.wait_drained() => None,
                    _ = sleep(config.drain_timeout) => {
                        warn!(target: "kubejob.watch", timeout = ?config.drain_timeout, "timeout waiting for end of logs");
                        Some(JobError::DrainTimeout(config.drain_timeout))
                    }
                };
                Outcome { success, error }
            }
        }
    }

    /// Act on one notification; `Some` ends the event loop.
    async fn on_pod(&mut self, pod: Pod, cancel: &CancellationToken) -> Option<Ending> {
        if let Some(tx) = &self.events {
            match deliver(tx, JobEvent::Status(pod.status.clone()), cancel).await {
                Delivery::Sent => {}
                Delivery::Closed => self.events = None,
                Delivery::Cancelled => return Some(Ending::Interrupted(JobError::Cancelled)),
            }
        }
        if cancel.is_cancelled() {
            return Some(Ending::Interrupted(JobError::Cancelled));
        }

        match &self.pod {
            None => self.pod = Some(pod.name.clone()),
            Some(first) if *first != pod.name => {
                warn!(target: "kubejob.watch", first = %first, other = %pod.name, "selector matches more than one pod");
                return Some(Ending::Interrupted(JobError::MultiplePods {
                    first: first.clone(),
                    other: pod.name,
                }));
            }
            Some(_) => {}
        }

        let phase = pod.phase();
        let previous = self.phase.last();
        if !self.phase.observe(phase) {
            trace!(target: "kubejob.watch", pod = %pod.name, %phase, "phase unchanged");
            return None;
        }
        info!(target: "kubejob.watch", pod = %pod.name, ?previous, %phase, "pod phase changed");

        match phase {
            PodPhase::Running => {
                self.ensure_streaming(&pod);
                None
            }
            PodPhase::Succeeded => {
                self.ensure_streaming(&pod);
                Some(Ending::Terminal { success: true })
            }
            PodPhase::Failed => {
                if let Some(detail) = &pod.status.message {
                    warn!(target: "kubejob.watch", pod = %pod.name, detail, "pod failed");
                }
                self.ensure_streaming(&pod);
                Some(Ending::Terminal { success: false })
            }
            PodPhase::Pending | PodPhase::Unknown => {
                for (container, reason) in pod.status.waiting() {
                    info!(target: "kubejob.watch", pod = %pod.name, container, reason, "container waiting");
                }
                None
            }
        }
    }

    /// Start log streaming for `pod` unless already started.
    fn ensure_streaming(&mut self, pod: &Pod) {
        if !self.listening {
            trace!(target: "kubejob.watch", "no output sink; skipping log streaming");
            return;
        }
        if !self.streaming.insert(pod.name.clone()) {
            return;
        }
        self.drain = Some(self.fanout.start(pod));
    }

    async fn wait_drained(&mut self) {
        if let Some(drain) = self.drain.as_mut() {
            drain.wait().await;
        }
    }

    async fn finish(self) {
        self.fanout.shutdown().await;
    }
}

async fn expire_at(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
