//! [`Cluster`] implementation backed by host processes.
//!
//! Every submitted workload gets exactly one pod named `<job>-<n>`. The pod moves through
//! `Pending -> Running -> Succeeded | Failed` and each transition, as well as every container
//! state change, is published to all matching watches.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::Child,
    sync::broadcast,
    task::{JoinHandle, JoinSet},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use kubejob_core::{Cluster, ClusterError, LogReader, PodWatch};
use kubejob_model::{
    ContainerSpec, ContainerState, ContainerStatus, LABEL_JOB_NAME, Labels, Pod, PodPhase,
    PodStatus, Workload,
};

use crate::{
    error::ExecError,
    logbuf::{DEFAULT_LOG_LIMIT, LogBuffer},
    util::{container_command, kill, lock, terminated},
};

const TARGET: &str = "kubejob.exec";

#[derive(Debug, Clone)]
pub struct LocalConfig {
    /// Capacity of the pod update broadcast; slow watches lag beyond it.
    pub event_buffer: usize,
    /// Capacity of each watch channel.
    pub watch_buffer: usize,
    /// Pipe size between a log buffer and its follower.
    pub follow_buffer: usize,
    /// Output bytes retained per container; older output is discarded.
    pub log_limit: usize,
    /// Start containers with an empty environment plus their declared variables.
    pub clear_env: bool,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            event_buffer: 256,
            watch_buffer: 64,
            follow_buffer: 64 * 1024,
            log_limit: DEFAULT_LOG_LIMIT,
            clear_env: false,
        }
    }
}

type Key = (String, String);

struct PodEntry {
    pod: Pod,
    logs: HashMap<String, LogBuffer>,
}

struct JobEntry {
    pod: String,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct State {
    pods: HashMap<Key, PodEntry>,
    jobs: HashMap<Key, JobEntry>,
    seq: u64,
}

struct Shared {
    state: Mutex<State>,
    updates: broadcast::Sender<Pod>,
}

impl Shared {
    /// Apply `f` to a live pod and publish the result. Returns `false` if the pod is gone.
    fn update(&self, key: &Key, f: impl FnOnce(&mut Pod)) -> bool {
        let mut state = lock(&self.state);
        let Some(entry) = state.pods.get_mut(key) else {
            return false;
        };
        f(&mut entry.pod);
        let _ = self.updates.send(entry.pod.clone());
        true
    }
}

/// Orchestrator running workloads as local processes.
#[derive(Clone)]
pub struct LocalCluster {
    shared: Arc<Shared>,
    config: LocalConfig,
}

impl Default for LocalCluster {
    fn default() -> Self {
        Self::new(LocalConfig::default())
    }
}

impl LocalCluster {
    pub fn new(config: LocalConfig) -> Self {
        let (updates, _) = broadcast::channel(config.event_buffer.max(1));
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                updates,
            }),
            config,
        }
    }

    /// Current view of a pod, if it exists.
    pub fn pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        let state = lock(&self.shared.state);
        state
            .pods
            .get(&(namespace.to_string(), name.to_string()))
            .map(|e| e.pod.clone())
    }

    fn prepare(&self, namespace: &str, workload: &Workload) -> Result<Workload, ExecError> {
        workload.validate()?;
        for c in &workload.containers {
            if c.argv().next().is_none() {
                return Err(ExecError::MissingProgram {
                    container: c.name.clone(),
                });
            }
        }

        let mut job = workload.clone();
        job.namespace = namespace.to_string();
        if job.selector.is_empty() {
            job.selector = Labels::single(LABEL_JOB_NAME, job.name.as_str());
        }
        Ok(job)
    }
}

#[async_trait]
impl Cluster for LocalCluster {
    #[instrument(level = "debug", skip(self, workload), fields(job = %workload.name))]
    async fn submit(&self, namespace: &str, workload: &Workload) -> Result<Workload, ClusterError> {
        let job = self.prepare(namespace, workload)?;
        let job_key = (job.namespace.clone(), job.name.clone());
        let cancel = CancellationToken::new();

        let pod_key = {
            let mut state = lock(&self.shared.state);
            if state.jobs.contains_key(&job_key) {
                return Err(ExecError::AlreadyExists {
                    namespace: job.namespace.clone(),
                    name: job.name.clone(),
                }
                .into());
            }
            state.seq += 1;
            let name = format!("{}-{}", job.name, state.seq);

            let mut labels = job.selector.clone();
            labels.insert(LABEL_JOB_NAME, job.name.as_str());
            let mut status = PodStatus::new(PodPhase::Pending);
            status.container_statuses = job
                .containers
                .iter()
                .map(|c| ContainerStatus {
                    name: c.name.clone(),
                    state: ContainerState::waiting("ContainerCreating"),
                })
                .collect();
            let pod = Pod {
                name: name.clone(),
                namespace: job.namespace.clone(),
                labels,
                containers: job.container_names().map(str::to_string).collect(),
                status,
            };
            let logs = job
                .containers
                .iter()
                .map(|c| (c.name.clone(), LogBuffer::new(self.config.log_limit)))
                .collect();

            let key = (job.namespace.clone(), name.clone());
            state.pods.insert(key.clone(), PodEntry { pod: pod.clone(), logs });
            state.jobs.insert(
                job_key.clone(),
                JobEntry {
                    pod: name,
                    cancel: cancel.clone(),
                    task: None,
                },
            );
            let _ = self.shared.updates.send(pod);
            key
        };
        info!(target: TARGET, job = %job.name, pod = %pod_key.1, "pod created");

        let task = tokio::spawn(run_pod(
            Arc::clone(&self.shared),
            pod_key,
            job.containers.clone(),
            self.config.clear_env,
            cancel,
        ));
        if let Some(entry) = lock(&self.shared.state).jobs.get_mut(&job_key) {
            entry.task = Some(task);
        }
        Ok(job)
    }

    async fn watch_pods(&self, namespace: &str, selector: &str) -> Result<PodWatch, ClusterError> {
        let selector =
            Labels::parse_selector(selector).map_err(|e| ClusterError::Api(e.to_string()))?;
        let namespace = namespace.to_string();
        let (tx, watch) = PodWatch::channel(self.config.watch_buffer.max(1));

        let (mut updates, initial) = {
            let state = lock(&self.shared.state);
            let updates = self.shared.updates.subscribe();
            let mut initial: Vec<Pod> = state
                .pods
                .values()
                .map(|e| &e.pod)
                .filter(|p| p.namespace == namespace && selector.matches(&p.labels))
                .cloned()
                .collect();
            initial.sort_by(|a, b| a.name.cmp(&b.name));
            (updates, initial)
        };
        debug!(target: TARGET, namespace = %namespace, selector = %selector.selector(), initial = initial.len(), "watch opened");

        tokio::spawn(async move {
            for pod in initial {
                if tx.send(pod).await.is_err() {
                    return;
                }
            }
            loop {
                let pod = tokio::select! {
                    _ = tx.closed() => return,
                    res = updates.recv() => match res {
                        Ok(pod) => pod,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(target: TARGET, skipped = n, "watch lagged behind pod updates");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                    },
                };
                if pod.namespace != namespace || !selector.matches(&pod.labels) {
                    continue;
                }
                if tx.send(pod).await.is_err() {
                    return;
                }
            }
        });

        Ok(watch)
    }

    async fn open_log_stream(&self, pod: &Pod, container: &str) -> Result<LogReader, ClusterError> {
        let buffer = {
            let state = lock(&self.shared.state);
            let entry = state
                .pods
                .get(&(pod.namespace.clone(), pod.name.clone()))
                .ok_or_else(|| ClusterError::NotFound {
                    kind: "pod",
                    name: pod.name.clone(),
                })?;

            let container = if container.is_empty() {
                match entry.pod.containers.as_slice() {
                    [only] => only.as_str(),
                    choices => {
                        return Err(ExecError::AmbiguousContainer {
                            pod: pod.name.clone(),
                            choices: choices.to_vec(),
                        }
                        .into());
                    }
                }
            } else {
                container
            };
            entry
                .logs
                .get(container)
                .cloned()
                .ok_or_else(|| ClusterError::NotFound {
                    kind: "container",
                    name: container.to_string(),
                })?
        };

        Ok(Box::pin(buffer.follow(self.config.follow_buffer)) as LogReader)
    }

    #[instrument(level = "debug", skip(self, workload), fields(job = %workload.name))]
    async fn delete(&self, workload: &Workload) -> Result<(), ClusterError> {
        let key = (workload.namespace.clone(), workload.name.clone());
        let job = {
            let mut state = lock(&self.shared.state);
            let job = state.jobs.remove(&key).ok_or_else(|| ClusterError::NotFound {
                kind: "job",
                name: workload.name.clone(),
            })?;
            state.pods.remove(&(key.0.clone(), job.pod.clone()));
            job
        };

        job.cancel.cancel();
        if let Some(task) = job.task
            && let Err(e) = task.await
        {
            warn!(target: TARGET, job = %workload.name, error = %e, "pod task ended abnormally");
        }
        info!(target: TARGET, job = %workload.name, pod = %job.pod, "job deleted");
        Ok(())
    }
}

/// Drive one pod from creation to its terminal phase, or until cancelled.
async fn run_pod(
    shared: Arc<Shared>,
    key: Key,
    containers: Vec<ContainerSpec>,
    clear_env: bool,
    cancel: CancellationToken,
) {
    let logs: HashMap<String, LogBuffer> = {
        let state = lock(&shared.state);
        match state.pods.get(&key) {
            Some(entry) => entry.logs.clone(),
            None => return,
        }
    };

    let mut running = JoinSet::new();
    let mut failed_to_start = Vec::new();
    for spec in &containers {
        let Some(buffer) = logs.get(&spec.name).cloned() else {
            continue;
        };
        let spawned = container_command(spec, clear_env).and_then(|mut cmd| {
            cmd.spawn().map_err(|source| ExecError::Spawn {
                container: spec.name.clone(),
                source,
            })
        });
        match spawned {
            Ok(child) => {
                trace!(target: TARGET, pod = %key.1, container = %spec.name, pid = ?child.id(), "container started");
                running.spawn(run_container(
                    spec.name.clone(),
                    child,
                    buffer,
                    cancel.clone(),
                ));
            }
            Err(e) => {
                warn!(target: TARGET, pod = %key.1, error = %e, "container failed to start");
                buffer.close();
                failed_to_start.push((
                    spec.name.clone(),
                    ContainerState::Terminated {
                        exit_code: None,
                        reason: Some("StartError".into()),
                    },
                    e.to_string(),
                ));
            }
        }
    }

    let mut message = failed_to_start.first().map(|(_, _, m)| m.clone());
    let started = !running.is_empty();
    let alive = shared.update(&key, |pod| {
        for (name, state, _) in &failed_to_start {
            set_container(pod, name, state.clone());
        }
        for spec in &containers {
            if !failed_to_start.iter().any(|(n, _, _)| n == &spec.name) {
                set_container(pod, &spec.name, ContainerState::Running);
            }
        }
        if started {
            pod.status.phase = PodPhase::Running;
        }
    });
    if !alive {
        cancel.cancel();
    }

    let mut all_ok = failed_to_start.is_empty();
    while let Some(res) = running.join_next().await {
        let (name, state) = match res {
            Ok(done) => done,
            Err(e) => {
                warn!(target: TARGET, pod = %key.1, error = %e, "container task failed");
                all_ok = false;
                continue;
            }
        };
        if let ContainerState::Terminated { exit_code, .. } = &state
            && *exit_code != Some(0)
        {
            all_ok = false;
            message.get_or_insert_with(|| match exit_code {
                Some(code) => format!("container {name} exited with code {code}"),
                None => format!("container {name} was killed"),
            });
        }
        debug!(target: TARGET, pod = %key.1, container = %name, state = ?state, "container terminated");
        if !cancel.is_cancelled() {
            shared.update(&key, |pod| set_container(pod, &name, state));
        }
    }

    if cancel.is_cancelled() {
        debug!(target: TARGET, pod = %key.1, "pod removed before completion");
        return;
    }
    let phase = if all_ok {
        PodPhase::Succeeded
    } else {
        PodPhase::Failed
    };
    shared.update(&key, |pod| {
        pod.status.phase = phase;
        if !all_ok {
            pod.status.message = message;
        }
    });
    info!(target: TARGET, pod = %key.1, phase = %phase, "pod finished");
}

/// Wait for one container, capturing its output, and report its final state.
async fn run_container(
    name: String,
    mut child: Child,
    logs: LogBuffer,
    cancel: CancellationToken,
) -> (String, ContainerState) {
    let mut pumps = JoinSet::new();
    if let Some(out) = child.stdout.take() {
        pumps.spawn(pump(out, logs.clone()));
    }
    if let Some(err) = child.stderr.take() {
        pumps.spawn(pump(err, logs.clone()));
    }

    let state = tokio::select! {
        status = child.wait() => match status {
            Ok(status) => terminated(status),
            Err(e) => ContainerState::Terminated {
                exit_code: None,
                reason: Some(format!("wait: {e}")),
            },
        },
        _ = cancel.cancelled() => {
            debug!(target: TARGET, container = %name, "cancelled; killing process");
            if let Err(e) = kill(&mut child).await {
                warn!(target: TARGET, container = %name, error = %e, "kill failed");
            }
            pumps.abort_all();
            ContainerState::Terminated {
                exit_code: None,
                reason: Some("Killed".into()),
            }
        }
    };

    while pumps.join_next().await.is_some() {}
    logs.close();
    (name, state)
}

/// Copy `src` into `logs` line by line so that lines of stdout and stderr never split each other.
async fn pump<R>(src: R, logs: LogBuffer)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(src);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => logs.append(&line),
            Err(e) => {
                trace!(target: TARGET, error = %e, "output pipe failed");
                break;
            }
        }
    }
}

fn set_container(pod: &mut Pod, name: &str, state: ContainerState) {
    if let Some(cs) = pod
        .status
        .container_statuses
        .iter_mut()
        .find(|cs| cs.name == name)
    {
        cs.state = state;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    fn sh(name: &str, script: &str) -> ContainerSpec {
        ContainerSpec::new(name).with_command(["sh", "-c", script])
    }

    async fn until_terminal(watch: &mut PodWatch) -> Vec<Pod> {
        let mut seen = Vec::new();
        while let Some(pod) = tokio::time::timeout(Duration::from_secs(10), watch.next())
            .await
            .expect("watch stalled")
        {
            let done = pod.phase().is_terminal();
            seen.push(pod);
            if done {
                break;
            }
        }
        seen
    }

    async fn read_all(mut r: LogReader) -> String {
        let mut s = String::new();
        r.read_to_string(&mut s).await.unwrap();
        s
    }

    #[tokio::test]
    async fn submit_defaults_namespace_and_selector() {
        let cluster = LocalCluster::default();
        let job = cluster
            .submit("ns", &Workload::new("hello").with_container(sh("main", "true")))
            .await
            .unwrap();

        assert_eq!(job.namespace, "ns");
        assert_eq!(job.selector.selector(), "job-name=hello");
        let pod = cluster.pod("ns", "hello-1").unwrap();
        assert_eq!(pod.labels.get(LABEL_JOB_NAME), Some("hello"));
        assert_eq!(pod.containers, vec!["main".to_string()]);
        cluster.delete(&job).await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_job_is_rejected() {
        let cluster = LocalCluster::default();
        let w = Workload::new("dup").with_container(sh("main", "sleep 5"));
        let job = cluster.submit("ns", &w).await.unwrap();

        let err = cluster.submit("ns", &w).await.unwrap_err();
        assert!(matches!(err, ClusterError::Api(m) if m.contains("already exists")));
        cluster.delete(&job).await.unwrap();
    }

    #[tokio::test]
    async fn container_without_command_is_rejected() {
        let cluster = LocalCluster::default();
        let mut c = ContainerSpec::new("main");
        c.image = Some("busybox".into());
        let err = cluster
            .submit("ns", &Workload::new("x").with_container(c))
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::Api(_)));
    }

    #[tokio::test]
    async fn successful_pod_walks_through_phases_and_keeps_logs() {
        let cluster = LocalCluster::default();
        let w = Workload::new("ok").with_container(sh("main", "echo out; echo err >&2"));
        let mut watch = cluster.watch_pods("ns", "job-name=ok").await.unwrap();
        let job = cluster.submit("ns", &w).await.unwrap();

        let seen = until_terminal(&mut watch).await;
        let phases: Vec<_> = seen.iter().map(Pod::phase).collect();
        assert_eq!(phases.first(), Some(&PodPhase::Pending));
        assert_eq!(phases.last(), Some(&PodPhase::Succeeded));

        let pod = seen.last().unwrap();
        let logs = read_all(cluster.open_log_stream(pod, "").await.unwrap()).await;
        let mut lines: Vec<_> = logs.lines().collect();
        lines.sort();
        assert_eq!(lines, ["err", "out"]);
        cluster.delete(&job).await.unwrap();
    }

    #[tokio::test]
    async fn failing_container_fails_the_pod() {
        let cluster = LocalCluster::default();
        let w = Workload::new("bad")
            .with_container(sh("a", "exit 0"))
            .with_container(sh("b", "exit 3"));
        let mut watch = cluster.watch_pods("ns", "job-name=bad").await.unwrap();
        let job = cluster.submit("ns", &w).await.unwrap();

        let pod = until_terminal(&mut watch).await.pop().unwrap();
        assert_eq!(pod.phase(), PodPhase::Failed);
        assert_eq!(
            pod.status.message.as_deref(),
            Some("container b exited with code 3")
        );
        cluster.delete(&job).await.unwrap();
    }

    #[tokio::test]
    async fn missing_binary_fails_the_pod() {
        let cluster = LocalCluster::default();
        let w = Workload::new("nobin")
            .with_container(ContainerSpec::new("main").with_command(["/nonexistent/binary"]));
        let mut watch = cluster.watch_pods("ns", "job-name=nobin").await.unwrap();
        let job = cluster.submit("ns", &w).await.unwrap();

        let pod = until_terminal(&mut watch).await.pop().unwrap();
        assert_eq!(pod.phase(), PodPhase::Failed);
        assert!(matches!(
            &pod.status.container_statuses[0].state,
            ContainerState::Terminated { reason: Some(r), .. } if r == "StartError"
        ));
        cluster.delete(&job).await.unwrap();
    }

    #[tokio::test]
    async fn watch_filters_by_namespace_and_selector() {
        let cluster = LocalCluster::default();
        let mut watch = cluster.watch_pods("ns", "job-name=mine").await.unwrap();
        let other = cluster
            .submit("ns", &Workload::new("other").with_container(sh("main", "true")))
            .await
            .unwrap();
        let elsewhere = cluster
            .submit("other-ns", &Workload::new("mine").with_container(sh("main", "true")))
            .await
            .unwrap();
        let mine = cluster
            .submit("ns", &Workload::new("mine").with_container(sh("main", "true")))
            .await
            .unwrap();

        let seen = until_terminal(&mut watch).await;
        assert!(seen.iter().all(|p| p.namespace == "ns" && p.name.starts_with("mine-")));
        for job in [other, elsewhere, mine] {
            cluster.delete(&job).await.unwrap();
        }
    }

    #[tokio::test]
    async fn open_log_stream_requires_container_for_multi_container_pods() {
        let cluster = LocalCluster::default();
        let w = Workload::new("multi")
            .with_container(sh("a", "echo a"))
            .with_container(sh("b", "echo b"));
        let job = cluster.submit("ns", &w).await.unwrap();
        let pod = cluster.pod("ns", "multi-1").unwrap();

        let err = cluster.open_log_stream(&pod, "").await.err().unwrap();
        assert!(matches!(err, ClusterError::Api(m) if m.contains("choose one of")));
        let err = cluster.open_log_stream(&pod, "c").await.err().unwrap();
        assert!(matches!(err, ClusterError::NotFound { kind: "container", .. }));

        assert_eq!(read_all(cluster.open_log_stream(&pod, "b").await.unwrap()).await, "b\n");
        cluster.delete(&job).await.unwrap();
    }

    #[tokio::test]
    async fn log_limit_keeps_the_newest_output() {
        let cluster = LocalCluster::new(LocalConfig {
            log_limit: 6,
            ..Default::default()
        });
        let w = Workload::new("chatty").with_container(sh("main", "echo one; echo two; echo three"));
        let mut watch = cluster.watch_pods("ns", "job-name=chatty").await.unwrap();
        let job = cluster.submit("ns", &w).await.unwrap();

        let pod = until_terminal(&mut watch).await.pop().unwrap();
        assert_eq!(read_all(cluster.open_log_stream(&pod, "").await.unwrap()).await, "three\n");
        cluster.delete(&job).await.unwrap();
    }

    #[tokio::test]
    async fn delete_kills_running_processes_and_forgets_the_pod() {
        let cluster = LocalCluster::default();
        let w = Workload::new("long").with_container(sh("main", "echo started; sleep 30"));
        let job = cluster.submit("ns", &w).await.unwrap();
        let pod = cluster.pod("ns", "long-1").unwrap();
        let mut logs = cluster.open_log_stream(&pod, "main").await.unwrap();
        let mut first = [0u8; 8];
        logs.read_exact(&mut first).await.unwrap();
        assert_eq!(&first, b"started\n");

        tokio::time::timeout(Duration::from_secs(10), cluster.delete(&job))
            .await
            .expect("delete hung")
            .unwrap();

        let mut rest = String::new();
        logs.read_to_string(&mut rest).await.unwrap();
        assert_eq!(rest, "");
        assert!(cluster.pod("ns", "long-1").is_none());
        assert!(matches!(
            cluster.delete(&job).await,
            Err(ClusterError::NotFound { kind: "job", .. })
        ));
    }
}
