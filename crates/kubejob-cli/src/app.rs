use std::sync::Arc;

use anyhow::Context;
use tokio::{io::AsyncReadExt, sync::mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use kubejob_core::{Cluster, JobError, JobRunner, Outcome, RunConfig, SharedOutput};
use kubejob_exec::LocalCluster;
use kubejob_model::Workload;
use kubejob_observe::log_events;

use crate::cli::Args;

const TARGET: &str = "kubejob.cli";
const EVENT_BUFFER: usize = 256;

/// Run one job end to end. Returns whether it succeeded.
pub async fn run(args: Args) -> anyhow::Result<bool> {
    let workload = read_workload(&args).await?;
    workload.validate().context("Invalid job spec")?;
    for w in workload.warnings() {
        warn!(target: TARGET, "{w}");
    }

    let cluster = Arc::new(LocalCluster::default());
    let runner = JobRunner::new(
        Arc::clone(&cluster),
        RunConfig {
            drain_timeout: args.drain_timeout,
            timeout: args.timeout,
            output: Some(SharedOutput::stdout()),
        },
    );

    let cancel = CancellationToken::new();
    let signals = tokio::spawn(cancel_on_signal(cancel.clone()));

    let job = runner.submit(&args.namespace, &workload).await?;

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let events = tokio::spawn(log_events(rx));
    let outcome = runner.watch(cancel, &job, Some(tx)).await;
    signals.abort();
    if let Err(e) = events.await {
        warn!(target: TARGET, error = %e, "event logger stopped abnormally");
    }

    let success = report(&outcome);

    info!(target: TARGET, job = %job.name, "Deleting job");
    if let Err(e) = cluster.delete(&job).await {
        warn!(target: TARGET, job = %job.name, error = %e, "Deleting job failed");
    }

    Ok(success)
}

async fn read_workload(args: &Args) -> anyhow::Result<Workload> {
    let mut raw = String::new();
    if args.reads_stdin() {
        tokio::io::stdin()
            .read_to_string(&mut raw)
            .await
            .context("Unable to read job spec from stdin")?;
    } else {
        raw = tokio::fs::read_to_string(&args.job_file)
            .await
            .with_context(|| format!("Unable to open job file {}", args.job_file.display()))?;
    }
    Workload::from_json(&raw).context("Unable to parse job spec")
}

/// Log the outcome and return whether the run succeeded.
fn report(outcome: &Outcome) -> bool {
    match &outcome.error {
        Some(JobError::DeadlineExceeded(d)) => info!(target: TARGET, "Timeout after {d:?}"),
        Some(JobError::Cancelled) => info!(target: TARGET, "Cancelled by signal"),
        Some(e) if e.is_diagnostic() => warn!(target: TARGET, "{e}"),
        Some(e) => warn!(target: TARGET, error = %e, "Job did not complete"),
        None => {}
    }

    if outcome.success {
        info!(target: TARGET, "Job completed successfully");
    } else {
        info!(target: TARGET, "Job failed");
    }
    outcome.success
}

async fn cancel_on_signal(cancel: CancellationToken) {
    wait_for_signal().await;
    cancel.cancel();
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!(target: TARGET, error = %e, "SIGTERM handler unavailable");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
