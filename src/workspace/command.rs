//! Bounded execution of preparation commands (install, schema sync, seed).

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::task::JoinHandle;

use crate::config::CommandSpec;
use crate::errors::PrepareError;
use crate::runner::{TailBuffer, collect_tail};

/// Characters of combined output kept in a failure message.
const FAILURE_OUTPUT_CHARS: usize = 500;

/// Outcome of one best-effort preparation step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepReport {
    Succeeded,
    Skipped,
    Failed(String),
}

impl StepReport {
    pub fn is_success(&self) -> bool {
        matches!(self, StepReport::Succeeded)
    }

    /// Collapse a step result, logging failures under `step`.
    pub fn from_result(step: &str, workspace: &Path, result: Result<(), PrepareError>) -> Self {
        match result {
            Ok(()) => {
                tracing::info!(step, workspace = %workspace.display(), "preparation step succeeded");
                StepReport::Succeeded
            }
            Err(e) => {
                tracing::warn!(step, workspace = %workspace.display(), error = %e, "preparation step failed, continuing");
                StepReport::Failed(e.to_string())
            }
        }
    }
}

/// Run `spec` (plus `extra_args`) in `cwd`, killing it if `timeout` elapses.
pub async fn run_step(
    spec: &CommandSpec,
    extra_args: &[String],
    cwd: &Path,
    env: &[(&str, &str)],
    timeout: Duration,
) -> Result<(), PrepareError> {
    let mut display = spec.display();
    for arg in extra_args {
        display.push(' ');
        display.push_str(arg);
    }

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .args(extra_args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in env {
        cmd.env(key, value);
    }

    let mut child = cmd.spawn().map_err(|source| PrepareError::Spawn {
        command: display.clone(),
        source,
    })?;

    let stdout = child
        .stdout
        .take()
        .map(|out| tokio::spawn(collect_tail(out, FAILURE_OUTPUT_CHARS)));
    let stderr = child
        .stderr
        .take()
        .map(|err| tokio::spawn(collect_tail(err, FAILURE_OUTPUT_CHARS)));

    // On timeout the child is dropped, which kills it and closes its pipes.
    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(result) => result.map_err(|source| PrepareError::Spawn {
            command: display.clone(),
            source,
        })?,
        Err(_) => {
            return Err(PrepareError::TimedOut {
                command: display,
                secs: timeout.as_secs(),
            });
        }
    };

    if status.success() {
        return Ok(());
    }

    let stderr = join_tail(stderr).await;
    let combined = if stderr.is_blank() {
        join_tail(stdout).await
    } else {
        stderr
    };
    Err(PrepareError::Failed {
        command: display,
        exit_code: status.code(),
        output: combined.as_str().trim().to_string(),
    })
}

async fn join_tail(task: Option<JoinHandle<TailBuffer>>) -> TailBuffer {
    match task {
        Some(task) => task.await.unwrap_or_default(),
        None => TailBuffer::default(),
    }
}

/// Last `max` characters of `s`.
pub fn tail_chars(s: &str, max: usize) -> String {
    let count = s.chars().count();
    if count <= max {
        s.to_string()
    } else {
        s.chars().skip(count - max).collect()
    }
}
