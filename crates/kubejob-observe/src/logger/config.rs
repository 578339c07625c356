use std::io::IsTerminal;

use tracing_subscriber::{EnvFilter, filter::LevelFilter};

use crate::logger::{error::LoggerError, format::LoggerFormat};

/// Target prefix of every record emitted by the kubejob crates.
pub const KUBEJOB_TARGETS: &str = "kubejob";

/// Logger settings, usually built from command line flags.
///
/// Records always go to stderr; stdout carries container output only.
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub format: LoggerFormat,
    /// A bare level (`debug`) or a full filter directive (`info,kubejob.stream=trace`).
    pub level: String,
    /// Print the target (`kubejob.watch`, `kubejob.stream`, ...) of each record.
    pub with_targets: bool,
    pub use_color: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            format: LoggerFormat::Text,
            level: "info".to_string(),
            with_targets: false,
            use_color: std::io::stderr().is_terminal(),
        }
    }
}

impl LoggerConfig {
    /// Filter directive for `level`.
    ///
    /// A bare level applies to kubejob records; other crates are capped at `warn`.
    /// Anything that already looks like a directive is used verbatim.
    pub fn directive(&self) -> Result<String, LoggerError> {
        let level = self.level.trim();
        if level.contains(['=', ',']) {
            return Ok(level.to_string());
        }
        let own: LevelFilter = level.parse().map_err(|e| LoggerError::InvalidFilter {
            level: self.level.clone(),
            reason: format!("{e}"),
        })?;
        let others = own.min(LevelFilter::WARN);
        Ok(format!("{others},{KUBEJOB_TARGETS}={own}").to_lowercase())
    }

    pub(crate) fn filter(&self) -> Result<EnvFilter, LoggerError> {
        let directive = self.directive()?;
        EnvFilter::try_new(&directive).map_err(|e| LoggerError::InvalidFilter {
            level: self.level.clone(),
            reason: e.to_string(),
        })
    }
}
