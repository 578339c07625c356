//! Job lifecycle watcher and concurrent log aggregator.
//!
//! [`JobRunner`] submits a workload through a [`Cluster`] and hands it to a [`Watcher`], which
//! follows the pod's phase transitions, fans out one log streamer per container via
//! [`LogFanout`] and merges terminal phase, log drain and cancellation into one [`Outcome`].

mod error;
pub use error::{ClusterError, JobError, StreamError};

pub mod cluster;
pub use cluster::{Cluster, LogReader, PodWatch};

pub mod output;
pub use output::{PrefixWriter, SharedOutput};

pub mod stream;
pub use stream::LogSinks;

pub mod fanout;
pub use fanout::{DrainSignal, LogFanout};

pub mod watch;
pub use watch::{Outcome, WatchConfig, Watcher};

pub mod runner;
pub use runner::{JobRunner, RunConfig, run_job};

#[cfg(test)]
mod testing;
