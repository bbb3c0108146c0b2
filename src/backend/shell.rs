//! Host shell backend.
//!
//! Hands the command string to the configured interpreter (`/bin/sh -c` by
//! default) and captures both output streams.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use super::{CommandRunner, ExecutionResult};
use crate::config::ShellConfig;

/// Exit status reported when the interpreter could not be launched.
pub const LAUNCH_FAILURE_EXIT_CODE: i32 = 113;

/// Exit status reported when a command outlives the configured timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Runs commands through the host's command interpreter.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new(&ShellConfig::default(), None)
    }
}

impl ShellRunner {
    /// Create a runner for the given interpreter.
    ///
    /// `timeout` of `None` lets commands run for as long as they need.
    pub fn new(shell: &ShellConfig, timeout: Option<Duration>) -> Self {
        Self {
            program: shell.program.clone(),
            args: shell.args.clone(),
            timeout,
        }
    }

    async fn spawn_and_wait(&self, command: &str) -> Result<ExecutionResult> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn interpreter: {}", self.program))?;

        let mut child_stdout = child.stdout.take().context("Failed to open stdout")?;
        let mut child_stderr = child.stderr.take().context("Failed to open stderr")?;

        // Reads and the wait share one deadline so a command that detaches
        // from its pipes is still bounded.
        let run_all = async {
            let mut stdout_buf = Vec::new();
            let mut stderr_buf = Vec::new();
            let (r1, r2, status) = tokio::join!(
                child_stdout.read_to_end(&mut stdout_buf),
                child_stderr.read_to_end(&mut stderr_buf),
                child.wait(),
            );
            r1.context("Failed to read stdout")?;
            r2.context("Failed to read stderr")?;
            let status = status.context("Failed to wait for process")?;
            Ok::<_, anyhow::Error>((status, stdout_buf, stderr_buf))
        };

        let (status, stdout_buf, stderr_buf) = match self.timeout {
            Some(limit) => {
                if let Ok(result) = tokio::time::timeout(limit, run_all).await {
                    result?
                } else {
                    if let Err(e) = child.kill().await {
                        warn!(error = %e, "Failed to kill timed out command");
                    }
                    warn!(timeout_secs = limit.as_secs_f64(), "Command timed out, killed");
                    return Ok(ExecutionResult {
                        exit_code: TIMEOUT_EXIT_CODE,
                        stdout: String::new(),
                        stderr: format!("command timed out after {}s", limit.as_secs_f64()),
                    });
                }
            }
            None => run_all.await?,
        };

        Ok(ExecutionResult {
            exit_code: exit_code(status),
            stdout: String::from_utf8_lossy(&stdout_buf).into_owned(),
            stderr: String::from_utf8_lossy(&stderr_buf).into_owned(),
        })
    }
}

/// Exit code of a finished process; a signal-killed process reports the
/// negated signal number.
#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    status
        .code()
        .or_else(|| status.signal().map(|signal| -signal))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[async_trait]
impl CommandRunner for ShellRunner {
    #[instrument(skip(self), fields(program = %self.program))]
    async fn run(&self, command: &str) -> ExecutionResult {
        debug!("Executing OS command");

        match self.spawn_and_wait(command).await {
            Ok(result) => {
                debug!(exit_code = result.exit_code, "Execution completed");
                result
            }
            Err(e) => {
                warn!(error = %format!("{e:#}"), "Unable to execute command");
                ExecutionResult {
                    exit_code: LAUNCH_FAILURE_EXIT_CODE,
                    stdout: format!("{e:#}"),
                    stderr: format!("Unable to execute: \"{command}\""),
                }
            }
        }
    }
}
