//! Shell-backed command executor for deterministic quality gates.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::{CommandExecutor, CommandOutput};

/// Runs gate commands through `sh -c` with a kill-on-timeout guard.
#[derive(Debug, Default)]
pub struct ShellCommandExecutor;

impl ShellCommandExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandExecutor for ShellCommandExecutor {
    async fn execute(&self, command: &str, timeout: Duration) -> DomainResult<CommandOutput> {
        debug!(command, timeout_ms = timeout.as_millis() as u64, "running gate command");
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DomainError::ExecutionFailed(format!("spawn failed: {e}")))?;

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(CommandOutput {
                exit_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                timed_out: false,
            }),
            Ok(Err(e)) => Err(DomainError::ExecutionFailed(format!("wait failed: {e}"))),
            // kill_on_drop reaps the child when the future is dropped here.
            Err(_) => Ok(CommandOutput::timeout()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exit_code_captured() {
        let executor = ShellCommandExecutor::new();
        let output = executor
            .execute("exit 3", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(output.exit_code, Some(3));
        assert!(!output.timed_out);
    }

    #[tokio::test]
    async fn test_stdout_captured() {
        let executor = ShellCommandExecutor::new();
        let output = executor
            .execute("echo hello", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(output.exit_code, Some(0));
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_timeout_reported() {
        let executor = ShellCommandExecutor::new();
        let output = executor
            .execute("sleep 5", Duration::from_millis(50))
            .await
            .unwrap();
        assert!(output.timed_out);
        assert!(output.exit_code.is_none());
    }
}
