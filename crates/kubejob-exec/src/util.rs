use std::{
    process::{ExitStatus, Stdio},
    sync::{Mutex, MutexGuard},
};

use tokio::process::{Child, Command};

use kubejob_model::{ContainerSpec, ContainerState};

use crate::error::ExecError;

pub fn cmd_program(program: &str, args: &[&str]) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd
}

/// Build the host command for one container: `command + args`, env and working dir,
/// stdout/stderr piped and stdin closed.
pub fn container_command(spec: &ContainerSpec, clear_env: bool) -> Result<Command, ExecError> {
    let argv: Vec<&str> = spec.argv().collect();
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| ExecError::MissingProgram {
            container: spec.name.clone(),
        })?;

    let mut cmd = cmd_program(program, args);
    if clear_env {
        cmd.env_clear();
    }
    for var in &spec.env {
        cmd.env(&var.name, &var.value);
    }
    if let Some(dir) = &spec.working_dir {
        cmd.current_dir(dir);
    }
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    Ok(cmd)
}

pub async fn kill(child: &mut Child) -> std::io::Result<()> {
    match child.start_kill() {
        Ok(()) => child.wait().await.map(|_| ()),
        // Already reaped.
        Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
        Err(e) => Err(e),
    }
}

pub fn terminated(status: ExitStatus) -> ContainerState {
    let reason = match status.code() {
        Some(0) => "Completed",
        Some(_) => "Error",
        None => "Killed",
    };
    ContainerState::Terminated {
        exit_code: status.code(),
        reason: Some(reason.to_string()),
    }
}

pub fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
