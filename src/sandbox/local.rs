//! Local-host executor.
//!
//! Runs shell commands directly on the local machine with no isolation.
//! Useful for development and for exercising the transfer and orchestration
//! layers in tests; real submissions belong in a [`DockerSandbox`].
//!
//! [`DockerSandbox`]: crate::sandbox::DockerSandbox

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::SandboxError;
use crate::sandbox::{validate_remote_path, ExecutionResult, RemoteExecutor};

/// Executor that runs commands on the local host.
pub struct LocalExecutor {
    command_timeout: Duration,
}

impl LocalExecutor {
    /// Create a local executor with the given per-command timeout.
    pub fn new(command_timeout: Duration) -> Self {
        Self { command_timeout }
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new(Duration::from_secs(3_600))
    }
}

#[async_trait]
impl RemoteExecutor for LocalExecutor {
    async fn send_shell_command(&self, cmd: &str) -> Result<ExecutionResult, SandboxError> {
        let result = tokio::time::timeout(
            self.command_timeout,
            Command::new("bash")
                .args(["-c", cmd])
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await;

        match result {
            Ok(Ok(output)) => Ok(ExecutionResult {
                exit_code: output.status.code().unwrap_or(-1),
                output: output.stdout,
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            }),
            Ok(Err(e)) => Err(SandboxError::Io(e)),
            Err(_) => Err(SandboxError::Timeout {
                seconds: self.command_timeout.as_secs(),
            }),
        }
    }

    async fn download(&self, remote_path: &str) -> Result<Vec<u8>, SandboxError> {
        validate_remote_path(remote_path)?;
        tokio::fs::read(remote_path)
            .await
            .map_err(|e| SandboxError::DownloadFailed {
                path: remote_path.to_string(),
                message: e.to_string(),
            })
    }

    async fn upload(&self, bytes: &[u8], remote_path: &str) -> Result<(), SandboxError> {
        validate_remote_path(remote_path)?;
        if let Some(parent) = std::path::Path::new(remote_path).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(remote_path, bytes)
            .await
            .map_err(|e| SandboxError::UploadFailed {
                path: remote_path.to_string(),
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_shell_command_captures_output() {
        let exec = LocalExecutor::default();
        let result = exec.send_shell_command("echo -n hello").await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.output_lossy(), "hello");
    }

    #[tokio::test]
    async fn test_send_shell_command_reports_exit_code() {
        let exec = LocalExecutor::default();
        let result = exec.send_shell_command("exit 3").await.unwrap();
        assert_eq!(result.exit_code, 3);
    }

    #[tokio::test]
    async fn test_check_shell_command_fails_on_nonzero() {
        let exec = LocalExecutor::default();
        let err = exec
            .check_shell_command("echo oops >&2; exit 1")
            .await
            .unwrap_err();
        match err {
            SandboxError::NonZeroExit { exit_code, stderr } => {
                assert_eq!(exit_code, 1);
                assert!(stderr.contains("oops"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_command_timeout() {
        let exec = LocalExecutor::new(Duration::from_millis(100));
        let err = exec.send_shell_command("sleep 5").await.unwrap_err();
        assert!(matches!(err, SandboxError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_upload_download_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/file.bin");
        let path_str = path.to_string_lossy().to_string();

        let exec = LocalExecutor::default();
        exec.upload(b"payload", &path_str).await.unwrap();
        let bytes = exec.download(&path_str).await.unwrap();
        assert_eq!(bytes, b"payload");
    }
}
