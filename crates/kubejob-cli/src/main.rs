mod app;
mod cli;

use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use crate::cli::Args;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = kubejob_observe::logger_init(&args.logger_config()) {
        eprintln!("kubejob: {e}");
        return ExitCode::FAILURE;
    }

    match app::run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(target: "kubejob.cli", "{e:#}");
            ExitCode::FAILURE
        }
    }
}
