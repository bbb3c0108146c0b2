//! Command execution backends.
//!
//! A backend runs one OS directive payload and captures what it produced.
//! Launch failures are reported as data inside the [`ExecutionResult`],
//! never as an error, so every OS directive yields a reply.

mod shell;

pub use shell::{ShellRunner, LAUNCH_FAILURE_EXIT_CODE, TIMEOUT_EXIT_CODE};

use async_trait::async_trait;

/// Result of executing one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Exit code of the process (0 = success).
    pub exit_code: i32,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
}

/// Strategy for running OS directive payloads.
///
/// The production implementation hands the string to the host shell;
/// tests substitute a fake that records what it was asked to run.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` and capture its output.
    ///
    /// Runs with the privileges and environment of the agent process.
    async fn run(&self, command: &str) -> ExecutionResult;
}
