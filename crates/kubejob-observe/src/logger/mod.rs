//! Process-wide `tracing` setup for the `kubejob` binary.

mod config;
mod error;
mod format;

pub use config::{KUBEJOB_TARGETS, LoggerConfig};
pub use error::LoggerError;
pub use format::LoggerFormat;

use time::{UtcOffset, format_description::well_known::Rfc3339};
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, fmt::time::OffsetTime, layer::SubscriberExt,
    util::SubscriberInitExt,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Install the global subscriber described by `cfg`.
pub fn logger_init(cfg: &LoggerConfig) -> Result<(), LoggerError> {
    let layer = build_layer(cfg)?;
    tracing_subscriber::registry().with(layer).try_init()?;
    Ok(())
}

fn build_layer(cfg: &LoggerConfig) -> Result<BoxedLayer, LoggerError> {
    let filter = cfg.filter()?;
    let layer = match cfg.format {
        LoggerFormat::Text => fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(cfg.use_color)
            .with_target(cfg.with_targets)
            .with_timer(local_timer())
            .with_filter(filter)
            .boxed(),
        LoggerFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(false)
            .with_target(cfg.with_targets)
            .with_timer(local_timer())
            .with_filter(filter)
            .boxed(),
        LoggerFormat::Journald => journald_layer(filter)?,
    };
    Ok(layer)
}

fn local_timer() -> OffsetTime<Rfc3339> {
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    OffsetTime::new(offset, Rfc3339)
}

#[cfg(all(target_os = "linux", feature = "journald"))]
fn journald_layer(filter: EnvFilter) -> Result<BoxedLayer, LoggerError> {
    let layer = tracing_journald::layer()
        .map_err(LoggerError::Journald)?
        .with_syslog_identifier("kubejob".to_string());
    Ok(layer.with_filter(filter).boxed())
}

#[cfg(not(all(target_os = "linux", feature = "journald")))]
fn journald_layer(_filter: EnvFilter) -> Result<BoxedLayer, LoggerError> {
    Err(LoggerError::JournaldNotSupported)
}
