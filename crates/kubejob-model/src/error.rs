use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("invalid job spec: {0}")]
    InvalidSpec(String),
    #[error("invalid label selector: {0:?}")]
    InvalidSelector(String),
    #[error("unable to parse job spec: {0}")]
    Parse(#[from] serde_json::Error),
}
