//! Rendering of [`JobEvent`]s into tracing records.

use kubejob_model::{JobEvent, PodPhase};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

const TARGET: &str = "kubejob.events";

#[inline]
pub fn message_for(ev: &JobEvent) -> &'static str {
    match ev {
        JobEvent::Status(status) => match status.phase {
            PodPhase::Pending => "pod is pending",
            PodPhase::Running => "pod is running",
            PodPhase::Succeeded => "pod succeeded",
            PodPhase::Failed => "pod failed",
            PodPhase::Unknown => "pod state is unknown",
        },
        JobEvent::Log(_) => "container output",
        JobEvent::Error(_) => "error while watching job",
    }
}

/// Emit one tracing record per event.
///
/// Phase transitions and waiting containers are already logged by the watcher, so raw status
/// notifications only show up at `debug`. Output lines go to `trace`; they are already on stdout.
pub fn log_event(ev: &JobEvent) {
    let msg = message_for(ev);

    match ev {
        JobEvent::Status(status) => debug!(
            target: TARGET,
            phase = %status.phase,
            waiting = status.waiting().count(),
            "{msg}"
        ),
        JobEvent::Log(line) => {
            trace!(target: TARGET, container = %line.container, line = %line.line, "{msg}")
        }
        JobEvent::Error(reason) => warn!(target: TARGET, reason = %reason, "{msg}"),
    }
}

/// Drain `rx`, logging every event, until all senders are gone.
///
/// Returns the number of events seen.
pub async fn log_events(mut rx: mpsc::Receiver<JobEvent>) -> usize {
    let mut seen = 0;
    while let Some(ev) = rx.recv().await {
        log_event(&ev);
        seen += 1;
    }
    seen
}
