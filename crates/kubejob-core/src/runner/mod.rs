use std::{sync::Arc, time::Duration};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use kubejob_model::{JobEvent, Workload};

use crate::{
    Cluster, JobError, LogSinks, Outcome, SharedOutput, WatchConfig, Watcher,
    watch::DEFAULT_DRAIN_TIMEOUT,
};

#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Grace period for log streams after the pod reached a terminal phase.
    pub drain_timeout: Duration,
    /// Overall watch limit; `None` waits until the job ends or the run is cancelled.
    pub timeout: Option<Duration>,
    /// Destination for prefixed container output.
    pub output: Option<SharedOutput>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            timeout: None,
            output: None,
        }
    }
}

/// Submits workloads and watches them to completion.
pub struct JobRunner<C: ?Sized> {
    cluster: Arc<C>,
    config: RunConfig,
}

impl<C> JobRunner<C>
where
    C: Cluster + ?Sized,
{
    pub fn new(cluster: Arc<C>, config: RunConfig) -> Self {
        Self { cluster, config }
    }

    #[instrument(level = "debug", skip(self, workload), fields(job = %workload.name))]
    pub async fn submit(&self, namespace: &str, workload: &Workload) -> Result<Workload, JobError> {
        let job = self
            .cluster
            .submit(namespace, workload)
            .await
            .map_err(JobError::Submit)?;
        info!(target: "kubejob.runner", job = %job.name, namespace = %job.namespace, "job created");
        Ok(job)
    }

    /// Watch an already submitted job.
    ///
    /// A run cancelled or timed out is never successful, even if the pod had already succeeded.
    /// If `events` is given, the receiver must be drained continuously; it is closed before this returns.
    pub async fn watch(
        &self,
        cancel: CancellationToken,
        job: &Workload,
        events: Option<mpsc::Sender<JobEvent>>,
    ) -> Outcome {
        let sinks = LogSinks {
            output: self.config.output.clone(),
            events,
        };
        let config = WatchConfig {
            drain_timeout: self.config.drain_timeout,
            timeout: self.config.timeout,
        };
        let mut outcome = Watcher::new(Arc::clone(&self.cluster), config, sinks)
            .watch(cancel, job)
            .await;
        if outcome.success && outcome.error.as_ref().is_some_and(JobError::is_interruption) {
            debug!(target: "kubejob.runner", job = %job.name, "run interrupted after the job succeeded");
            outcome.success = false;
        }
        outcome
    }

    /// Submit `workload` and watch it to completion.
    ///
    /// Deleting the job afterwards is left to the caller.
    pub async fn run(
        &self,
        cancel: CancellationToken,
        namespace: &str,
        workload: &Workload,
        events: Option<mpsc::Sender<JobEvent>>,
    ) -> Outcome {
        match self.submit(namespace, workload).await {
            Ok(job) => self.watch(cancel, &job, events).await,
            Err(e) => {
                debug!(target: "kubejob.runner", error = %e, "submission failed");
                Outcome::failed(e)
            }
        }
    }
}

/// Run `workload` in `namespace` with the default configuration.
pub async fn run_job<C>(
    cancel: CancellationToken,
    cluster: Arc<C>,
    namespace: &str,
    workload: &Workload,
    events: Option<mpsc::Sender<JobEvent>>,
) -> Outcome
where
    C: Cluster + ?Sized,
{
    JobRunner::new(cluster, RunConfig::default())
        .run(cancel, namespace, workload, events)
        .await
}
