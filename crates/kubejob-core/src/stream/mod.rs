//! Reading one container's output to exhaustion.

use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use kubejob_model::{JobEvent, LogLine, Pod};

use crate::{Cluster, PrefixWriter, SharedOutput, StreamError};

/// Where streamed lines go. Either sink may be absent.
#[derive(Clone, Default)]
pub struct LogSinks {
    /// Shared destination for prefixed raw output.
    pub output: Option<SharedOutput>,
    /// Structured events; the receiver must be drained continuously.
    pub events: Option<mpsc::Sender<JobEvent>>,
}

impl LogSinks {
    /// Returns `true` if nobody is listening, in which case streaming is pointless.
    pub fn is_empty(&self) -> bool {
        self.output.is_none() && self.events.is_none()
    }
}

/// Result of delivering one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Sent,
    /// Receiver dropped; nobody consumes events any more.
    Closed,
    Cancelled,
}

/// Send `event`, giving up when `cancel` fires so a stalled consumer cannot block shutdown.
pub(crate) async fn deliver(
    tx: &mpsc::Sender<JobEvent>,
    event: JobEvent,
    cancel: &CancellationToken,
) -> Delivery {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Delivery::Cancelled,
        res = tx.send(event) => match res {
            Ok(()) => Delivery::Sent,
            Err(_) => Delivery::Closed,
        },
    }
}

/// Stream one container and report any failure.
///
/// Failures are soft: they are logged and sent as [`JobEvent::Error`], siblings keep running.
/// Completion is signalled by the enclosing task ending.
pub async fn run_streamer<C>(
    cluster: &C,
    pod: &Pod,
    container: &str,
    label: String,
    sinks: &LogSinks,
    cancel: &CancellationToken,
) where
    C: Cluster + ?Sized,
{
    match stream_container(cluster, pod, container, label, sinks, cancel).await {
        Ok(()) => debug!(target: "kubejob.stream", pod = %pod.name, container, "log stream ended"),
        Err(e) => {
            warn!(target: "kubejob.stream", pod = %pod.name, container, error = %e, "log stream failed");
            if let Some(tx) = &sinks.events {
                let _ = deliver(tx, JobEvent::Error(e.to_string()), cancel).await;
            }
        }
    }
}

/// Read the output of `container` until it ends, errors or `cancel` fires.
///
/// `container` is empty when the pod has exactly one container. Lines keep their read order.
pub async fn stream_container<C>(
    cluster: &C,
    pod: &Pod,
    container: &str,
    label: String,
    sinks: &LogSinks,
    cancel: &CancellationToken,
) -> Result<(), StreamError>
where
    C: Cluster + ?Sized,
{
    let stream = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Ok(()),
        res = cluster.open_log_stream(pod, container) => res.map_err(|source| StreamError::Open {
            pod: pod.name.clone(),
            container: container.to_string(),
            source,
        })?,
    };
    trace!(target: "kubejob.stream", pod = %pod.name, container, "log stream opened");

    let mut reader = BufReader::new(stream);
    let mut writer = sinks
        .output
        .clone()
        .map(|out| PrefixWriter::new(out, move || label.clone()));
    let mut events = sinks.events.clone();
    let write_err = |source| StreamError::Write {
        pod: pod.name.clone(),
        container: container.to_string(),
        source,
    };

    let mut buf = Vec::with_capacity(256);
    loop {
        buf.clear();
        let n = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(target: "kubejob.stream", pod = %pod.name, container, "cancelled; abandoning log stream");
                break;
            }
            res = reader.read_until(b'\n', &mut buf) => res.map_err(|source| StreamError::Read {
                pod: pod.name.clone(),
                container: container.to_string(),
                source,
            })?,
        };
        if n == 0 {
            break;
        }

        if let Some(w) = writer.as_mut() {
            w.write(&buf).await.map_err(write_err)?;
        }

        let delivery = match &events {
            Some(tx) => {
                let line = String::from_utf8_lossy(trim_eol(&buf)).into_owned();
                deliver(tx, JobEvent::Log(LogLine::new(container, line)), cancel).await
            }
            None => Delivery::Sent,
        };
        match delivery {
            Delivery::Sent => {}
            Delivery::Closed => events = None,
            Delivery::Cancelled => break,
        }
    }

    if let Some(w) = writer.as_mut() {
        w.finish().await.map_err(write_err)?;
    }
    Ok(())
}

fn trim_eol(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Capture, FakeCluster, pod};
    use kubejob_model::PodPhase;

    async fn collect(mut rx: mpsc::Receiver<JobEvent>) -> Vec<JobEvent> {
        let mut out = Vec::new();
        while let Some(ev) = rx.recv().await {
            out.push(ev);
        }
        out
    }

    #[tokio::test]
    async fn forwards_lines_to_both_sinks() {
        let (cluster, _tx) = FakeCluster::new();
        cluster.logs("a", &["1", "2"]);
        let cap = Capture::default();
        let (etx, erx) = mpsc::channel(16);
        let sinks = LogSinks {
            output: Some(cap.output()),
            events: Some(etx),
        };
        let p = pod("p", &["a", "b"], PodPhase::Running);

        stream_container(&cluster, &p, "a", "a: ".into(), &sinks, &CancellationToken::new())
            .await
            .unwrap();
        drop(sinks);

        assert_eq!(cap.text(), "a: 1\na: 2\n");
        assert_eq!(
            collect(erx).await,
            vec![
                JobEvent::Log(LogLine::new("a", "1")),
                JobEvent::Log(LogLine::new("a", "2")),
            ]
        );
    }

    #[tokio::test]
    async fn open_failure_is_reported_as_event() {
        let (cluster, _tx) = FakeCluster::new();
        cluster.fail_open("");
        let (etx, erx) = mpsc::channel(16);
        let sinks = LogSinks {
            output: None,
            events: Some(etx),
        };
        let p = pod("p", &["main"], PodPhase::Running);

        run_streamer(&cluster, &p, "", String::new(), &sinks, &CancellationToken::new()).await;
        drop(sinks);

        let events = collect(erx).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], JobEvent::Error(m) if m.contains("log stream request")));
    }

    #[tokio::test]
    async fn read_error_keeps_lines_already_read() {
        let (cluster, _tx) = FakeCluster::new();
        cluster.fail_read("", &["first"]);
        let (etx, erx) = mpsc::channel(16);
        let sinks = LogSinks {
            output: None,
            events: Some(etx),
        };
        let p = pod("p", &["main"], PodPhase::Running);

        run_streamer(&cluster, &p, "", String::new(), &sinks, &CancellationToken::new()).await;
        drop(sinks);

        let events = collect(erx).await;
        assert_eq!(events[0], JobEvent::Log(LogLine::new("", "first")));
        assert!(matches!(&events[1], JobEvent::Error(m) if m.contains("reading logs")));
    }

    #[tokio::test]
    async fn cancellation_abandons_open_stream() {
        let (cluster, _tx) = FakeCluster::new();
        let _writer = cluster.hold_logs("");
        let sinks = LogSinks {
            output: Some(Capture::default().output()),
            events: None,
        };
        let p = pod("p", &["main"], PodPhase::Running);
        let cancel = CancellationToken::new();

        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                stream_container(&cluster, &p, "", String::new(), &sinks, &cancel).await
            })
        };
        tokio::task::yield_now().await;
        cancel.cancel();

        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn unterminated_last_line_is_flushed() {
        let (cluster, _tx) = FakeCluster::new();
        let mut writer = cluster.hold_logs("");
        let cap = Capture::default();
        let sinks = LogSinks {
            output: Some(cap.output()),
            events: None,
        };
        let p = pod("p", &["main"], PodPhase::Running);

        use tokio::io::AsyncWriteExt;
        writer.write_all(b"done\r\nno newline").await.unwrap();
        drop(writer);

        stream_container(&cluster, &p, "", String::new(), &sinks, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(cap.text(), "done\r\nno newline\n");
    }

    #[test]
    fn trim_eol_strips_crlf() {
        assert_eq!(trim_eol(b"x\r\n"), b"x");
        assert_eq!(trim_eol(b"x\n"), b"x");
        assert_eq!(trim_eol(b"x"), b"x");
    }
}
