use std::time::Duration;

use thiserror::Error;

/// Failure reported by a [`Cluster`](crate::Cluster) implementation.
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("api error: {0}")]
    Api(String),
    #[error("{kind} {name:?} not found")]
    NotFound { kind: &'static str, name: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection closed")]
    Closed,
}

/// Failure of a single container log stream.
///
/// Never fatal to the job run; reported as a [`JobEvent::Error`](kubejob_model::JobEvent::Error).
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("log stream request for {pod}/{container} failed: {source}")]
    Open {
        pod: String,
        container: String,
        #[source]
        source: ClusterError,
    },
    #[error("reading logs of {pod}/{container} failed: {source}")]
    Read {
        pod: String,
        container: String,
        #[source]
        source: std::io::Error,
    },
    #[error("writing logs of {pod}/{container} failed: {source}")]
    Write {
        pod: String,
        container: String,
        #[source]
        source: std::io::Error,
    },
}

/// Error part of a job [`Outcome`](crate::Outcome).
#[derive(Error, Debug)]
pub enum JobError {
    #[error("failed to create job: {0}")]
    Submit(#[source] ClusterError),
    #[error("unable to watch: {0}")]
    Watch(#[source] ClusterError),
    #[error("pod watch closed before a terminal phase was observed")]
    WatchClosed,
    #[error("selector matches more than one pod ({first:?} and {other:?})")]
    MultiplePods { first: String, other: String },
    #[error("timeout waiting for end of logs after {0:?}")]
    DrainTimeout(Duration),
    #[error("cancelled")]
    Cancelled,
    #[error("deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
}

impl JobError {
    /// Returns `true` for errors that do not invalidate an already observed terminal phase.
    pub fn is_diagnostic(&self) -> bool {
        matches!(self, JobError::DrainTimeout(_))
    }

    /// Returns `true` if the run was cut short by its caller rather than ended by the job.
    pub fn is_interruption(&self) -> bool {
        matches!(self, JobError::Cancelled | JobError::DeadlineExceeded(_))
    }
}
