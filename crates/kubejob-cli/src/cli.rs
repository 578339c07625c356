use std::{path::PathBuf, time::Duration};

use clap::Parser;

use kubejob_observe::{LoggerConfig, LoggerFormat};

const AFTER_HELP: &str = "\
Examples:
  # Read job spec from file:
  kubejob -n test job.json

  # Read job spec from stdin:
  cat job.json | kubejob -n test
";

/// Create a job and watch its logs until it completes.
#[derive(Parser, Debug)]
#[command(name = "kubejob", version, about, long_about = None, after_help = AFTER_HELP)]
pub struct Args {
    /// Namespace to create the job in
    #[arg(short = 'n', long)]
    pub namespace: String,

    /// Give up after this long (e.g. 10s, 1m, 1h, 1m30s)
    #[arg(short = 't', long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// How long to wait for log streams once the job has finished
    #[arg(long, value_parser = parse_duration, default_value = "10s")]
    pub drain_timeout: Duration,

    /// Log record format: text or json
    #[arg(long, default_value = "text")]
    pub log_format: LoggerFormat,

    /// Log level for kubejob records, or a full filter such as "info,kubejob.stream=debug"
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Show the component (kubejob.watch, kubejob.stream, ...) of each log record
    #[arg(long)]
    pub log_targets: bool,

    /// Job spec file, - for stdin
    #[arg(value_name = "JOBFILE", default_value = "-")]
    pub job_file: PathBuf,
}

impl Args {
    pub fn logger_config(&self) -> LoggerConfig {
        LoggerConfig {
            format: self.log_format,
            level: self.log_level.clone(),
            with_targets: self.log_targets,
            ..Default::default()
        }
    }

    pub fn reads_stdin(&self) -> bool {
        self.job_file.as_os_str() == "-"
    }
}

/// Parse a duration such as `500ms`, `10s`, `1.5h` or `1m30s`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let is_num = |c: char| c.is_ascii_digit() || c == '.';
    let mut rest = s;
    let mut secs = 0f64;
    while !rest.is_empty() {
        let (num, tail) = rest.split_at(rest.find(|c| !is_num(c)).unwrap_or(rest.len()));
        let (unit, tail) = tail.split_at(tail.find(is_num).unwrap_or(tail.len()));

        let value: f64 = num
            .parse()
            .map_err(|_| format!("invalid duration {s:?}"))?;
        let scale = match unit {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            "" => return Err(format!("missing unit in duration {s:?}")),
            other => return Err(format!("unknown unit {other:?} in duration {s:?}")),
        };
        secs += value * scale;
        rest = tail;
    }
    Ok(Duration::from_secs_f64(secs))
}
