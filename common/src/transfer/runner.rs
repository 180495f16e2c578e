// External process seam. Everything that shells out goes through
// `CommandRunner`; tests stub this trait instead of spawning rclone.

use crate::errors::TransferError;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Captured result of one process run.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, TransferError>;
}

/// Runs the real binary. Children are killed if the future is dropped so an
/// abandoned run cannot leak processes.
pub struct RcloneRunner;

#[async_trait]
impl CommandRunner for RcloneRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, TransferError> {
        debug!(program, ?args, "spawning rclone");
        let output = Command::new(program)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| TransferError::Spawn(e.to_string()))?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

/// Startup probe: first line of `rclone version`, or `None` when the binary
/// is not callable.
pub async fn verify_rclone(runner: &dyn CommandRunner, program: &str) -> Option<String> {
    match runner.run(program, &["version".to_string()]).await {
        Ok(output) if output.success() => {
            output.stdout.lines().next().map(str::to_string)
        }
        _ => None,
    }
}
