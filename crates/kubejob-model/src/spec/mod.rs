mod workload;
pub use workload::{ContainerSpec, EnvVar, Workload};
