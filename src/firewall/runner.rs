use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

/// Output from a finished command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// stdout and stderr concatenated, for operator-facing output.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Executes external commands. Implemented by [`SystemRunner`] in
/// production and by in-memory fakes in tests.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput>;

    /// Whether the tool binary exists at the given path.
    fn is_installed(&self, program: &str) -> bool {
        std::path::Path::new(program).is_file()
    }
}

/// Runs commands through sudo with a hard timeout. The child is killed if
/// the future is dropped or the timeout fires.
pub struct SystemRunner {
    sudo_path: String,
    timeout: Duration,
}

impl SystemRunner {
    pub fn new(sudo_path: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            sudo_path: sudo_path.into(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        debug!(program = %program, ?args, "Running privileged command");
        let child = Command::new(&self.sudo_path)
            .arg("-n")
            .arg(program)
            .args(args)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| {
                warn!(program = %program, timeout_secs = self.timeout.as_secs(), "Command timed out");
                anyhow::anyhow!("command timed out after {}s: {}", self.timeout.as_secs(), program)
            })?
            .with_context(|| format!("failed to execute {}", program))?;

        let result = CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if !result.success() {
            debug!(
                program = %program,
                status = ?result.status,
                stderr = %result.stderr.trim(),
                "Command exited nonzero"
            );
        }
        Ok(result)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combined_output() {
        let out = CommandOutput {
            status: Some(0),
            stdout: "rules updated".to_string(),
            stderr: String::new(),
        };
        assert_eq!(out.combined(), "rules updated");

        let out = CommandOutput {
            status: Some(1),
            stdout: "partial".to_string(),
            stderr: "permission denied".to_string(),
        };
        assert_eq!(out.combined(), "partial\npermission denied");
        assert!(!out.success());
    }

    #[tokio::test]
    async fn test_system_runner_reports_missing_binary() {
        let runner = SystemRunner::new("/nonexistent/sudo", 5);
        let err = runner.run("ufw", &["status"]).await.unwrap_err();
        assert!(err.to_string().contains("failed to execute"));
    }
}
