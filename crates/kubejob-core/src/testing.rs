//! In-memory collaborators for unit tests.

use std::{
    collections::HashMap,
    io,
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll},
};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::mpsc;

use kubejob_model::{Labels, Pod, PodPhase, PodStatus, Workload};

use crate::{Cluster, ClusterError, LogReader, PodWatch, SharedOutput};

/// Writer capturing everything into a shared buffer.
#[derive(Clone, Default)]
pub struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    pub fn output(&self) -> SharedOutput {
        SharedOutput::new(self.clone())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    /// Captured lines in sorted order, for assertions that ignore interleaving.
    pub fn sorted_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self.text().lines().map(str::to_string).collect();
        lines.sort();
        lines
    }
}

impl AsyncWrite for Capture {
    fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Reader failing on first poll.
struct Broken;

impl AsyncRead for Broken {
    fn poll_read(self: Pin<&mut Self>, _: &mut Context<'_>, _: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::ConnectionReset, "stream reset")))
    }
}

enum FakeLog {
    Text(String),
    Held(Option<DuplexStream>),
    FailOpen,
    FailRead(String),
}

#[derive(Default)]
struct FakeState {
    watch: Option<PodWatch>,
    fail_watch: bool,
    fail_submit: bool,
    logs: HashMap<String, FakeLog>,
    opened: Vec<(String, String)>,
    submitted: Vec<Workload>,
    deleted: Vec<String>,
}

/// Scriptable cluster: the test pushes pod notifications and decides what each log stream yields.
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<FakeState>>,
}

impl FakeCluster {
    /// Create the cluster and the sender used to deliver pod notifications.
    pub fn new() -> (Self, mpsc::Sender<Pod>) {
        let (tx, watch) = PodWatch::channel(64);
        let cluster = Self::default();
        cluster.state.lock().unwrap().watch = Some(watch);
        (cluster, tx)
    }

    pub fn fail_watch(&self) {
        self.state.lock().unwrap().fail_watch = true;
    }

    pub fn fail_submit(&self) {
        self.state.lock().unwrap().fail_submit = true;
    }

    /// Container log that ends after `lines`.
    pub fn logs(&self, container: &str, lines: &[&str]) {
        let text: String = lines.iter().map(|l| format!("{l}\n")).collect();
        self.set(container, FakeLog::Text(text));
    }

    /// Container log held open until the returned writer is dropped.
    pub fn hold_logs(&self, container: &str) -> DuplexStream {
        let (writer, reader) = tokio::io::duplex(1024);
        self.set(container, FakeLog::Held(Some(reader)));
        writer
    }

    pub fn fail_open(&self, container: &str) {
        self.set(container, FakeLog::FailOpen);
    }

    /// Container log yielding `lines`, then a read error.
    pub fn fail_read(&self, container: &str, lines: &[&str]) {
        let text: String = lines.iter().map(|l| format!("{l}\n")).collect();
        self.set(container, FakeLog::FailRead(text));
    }

    /// `(pod, container)` of every log stream opened so far.
    pub fn opened(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().opened.clone()
    }

    pub fn submitted(&self) -> Vec<Workload> {
        self.state.lock().unwrap().submitted.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }

    fn set(&self, container: &str, log: FakeLog) {
        self.state
            .lock()
            .unwrap()
            .logs
            .insert(container.to_string(), log);
    }
}

#[async_trait]
impl Cluster for FakeCluster {
    async fn submit(&self, namespace: &str, workload: &Workload) -> Result<Workload, ClusterError> {
        let mut st = self.state.lock().unwrap();
        if st.fail_submit {
            return Err(ClusterError::Api("quota exceeded".into()));
        }
        let mut created = workload.clone();
        created.namespace = namespace.to_string();
        st.submitted.push(created.clone());
        Ok(created)
    }

    async fn watch_pods(&self, _namespace: &str, _selector: &str) -> Result<PodWatch, ClusterError> {
        let mut st = self.state.lock().unwrap();
        if st.fail_watch {
            return Err(ClusterError::Api("forbidden".into()));
        }
        st.watch.take().ok_or(ClusterError::Closed)
    }

    async fn open_log_stream(&self, pod: &Pod, container: &str) -> Result<LogReader, ClusterError> {
        let mut st = self.state.lock().unwrap();
        st.opened.push((pod.name.clone(), container.to_string()));

        let not_found = || ClusterError::NotFound {
            kind: "container",
            name: container.to_string(),
        };
        match st.logs.get_mut(container).ok_or_else(not_found)? {
            FakeLog::Text(text) => Ok(Box::pin(io::Cursor::new(text.clone().into_bytes())) as LogReader),
            FakeLog::Held(reader) => reader.take().map(|r| Box::pin(r) as LogReader).ok_or_else(not_found),
            FakeLog::FailOpen => Err(ClusterError::Api("container not ready".into())),
            FakeLog::FailRead(text) => {
                let head = io::Cursor::new(text.clone().into_bytes());
                Ok(Box::pin(head.chain(Broken)) as LogReader)
            }
        }
    }

    async fn delete(&self, workload: &Workload) -> Result<(), ClusterError> {
        self.state.lock().unwrap().deleted.push(workload.name.clone());
        Ok(())
    }
}

/// Pod notification with the given containers and phase.
pub fn pod(name: &str, containers: &[&str], phase: PodPhase) -> Pod {
    Pod {
        name: name.to_string(),
        namespace: "test".to_string(),
        labels: Labels::single("app", "demo"),
        containers: containers.iter().map(|c| c.to_string()).collect(),
        status: PodStatus::new(phase),
    }
}
