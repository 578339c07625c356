use std::{fmt, str::FromStr};

use crate::logger::error::LoggerError;

/// Shape of the log records written by the binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoggerFormat {
    /// Human readable lines, colored on a terminal.
    #[default]
    Text,
    /// One JSON object per record, for log shippers.
    Json,
    /// Native journald fields. Linux only, behind the `journald` feature.
    Journald,
}

impl LoggerFormat {
    /// Formats usable in this build.
    pub fn available() -> &'static [LoggerFormat] {
        if cfg!(all(target_os = "linux", feature = "journald")) {
            &[LoggerFormat::Text, LoggerFormat::Json, LoggerFormat::Journald]
        } else {
            &[LoggerFormat::Text, LoggerFormat::Json]
        }
    }

    fn name(self) -> &'static str {
        match self {
            LoggerFormat::Text => "text",
            LoggerFormat::Json => "json",
            LoggerFormat::Journald => "journald",
        }
    }
}

impl FromStr for LoggerFormat {
    type Err = LoggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        if wanted.eq_ignore_ascii_case("journald") && !Self::available().contains(&LoggerFormat::Journald) {
            return Err(LoggerError::JournaldNotSupported);
        }
        Self::available()
            .iter()
            .copied()
            .find(|f| wanted.eq_ignore_ascii_case(f.name()))
            .ok_or_else(|| LoggerError::InvalidFormat {
                given: s.to_string(),
                available: Self::available()
                    .iter()
                    .map(|f| f.name())
                    .collect::<Vec<_>>()
                    .join("|"),
            })
    }
}

impl fmt::Display for LoggerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
