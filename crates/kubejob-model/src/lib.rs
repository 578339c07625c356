//! Domain types shared by the job runner: workload specs, pods, phases and job events.

mod error;
pub use error::ModelError;

mod domain;
pub use domain::*;

mod spec;
pub use spec::*;
