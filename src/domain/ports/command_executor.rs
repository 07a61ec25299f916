//! Command executor port for deterministic quality gates.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::errors::DomainResult;

/// Captured output of one gate command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code; `None` when the process was killed by a signal or timed out.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Output for a command that hit its timeout.
    pub fn timeout() -> Self {
        Self {
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: true,
        }
    }
}

/// Runs gate commands with a timeout, capturing stdout/stderr.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, command: &str, timeout: Duration) -> DomainResult<CommandOutput>;
}
