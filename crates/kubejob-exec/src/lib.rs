//! Local orchestrator: runs every container of a workload as a host process.

mod error;
pub use error::ExecError;

mod util;

pub mod logbuf;
pub use logbuf::LogBuffer;

pub mod local;
pub use local::{LocalCluster, LocalConfig};
