use thiserror::Error;

use kubejob_core::ClusterError;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("container {container:?} has no command")]
    MissingProgram { container: String },
    #[error("spawn of container {container:?} failed: {source}")]
    Spawn {
        container: String,
        #[source]
        source: std::io::Error,
    },
    #[error("jobs {name:?} already exists in namespace {namespace:?}")]
    AlreadyExists { namespace: String, name: String },
    #[error("a container name must be specified for pod {pod}, choose one of: {choices:?}")]
    AmbiguousContainer { pod: String, choices: Vec<String> },
    #[error("invalid workload: {0}")]
    Invalid(#[from] kubejob_model::ModelError),
}

impl From<ExecError> for ClusterError {
    fn from(e: ExecError) -> Self {
        ClusterError::Api(e.to_string())
    }
}
