use thiserror::Error;
use tracing_subscriber::util::TryInitError;

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("invalid log format {given:?} (available: {available})")]
    InvalidFormat { given: String, available: String },
    #[error("journald logging needs Linux and the `journald` feature")]
    JournaldNotSupported,
    #[error("unable to connect to journald: {0}")]
    Journald(#[source] std::io::Error),
    #[error("invalid log level {level:?}: {reason}")]
    InvalidFilter { level: String, reason: String },
    #[error("a global logger is already installed")]
    AlreadyInitialized(#[from] TryInitError),
}
