//! Docker-backed sandbox for isolated submission execution.
//!
//! Each submission gets an ephemeral container kept alive by a long sleep;
//! commands run through `docker exec`, and file movement pipes bytes through
//! stdin/stdout so no host volume is ever mounted into the container.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::SandboxError;
use crate::sandbox::{validate_remote_path, ExecutionResult, RemoteExecutor};

/// Default container image for reproduction runs.
const DEFAULT_IMAGE: &str = "python:3.12-slim";

/// Default per-command timeout. Long enough for dependency installs and
/// archive builds; the reproduction entrypoint itself runs detached and is
/// bounded by the orchestrator's wall clock instead.
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 3_600;

/// Configuration for a Docker sandbox.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Docker image to run.
    pub image: String,
    /// Memory limit passed to `docker run` (e.g. "16g").
    pub memory: String,
    /// Timeout applied to every individual `docker exec` call.
    pub command_timeout: Duration,
}

impl SandboxConfig {
    /// Create a configuration with the default image and limits.
    pub fn new() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            memory: "16g".to_string(),
            command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
        }
    }

    /// Set the container image.
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    /// Set the container memory limit.
    pub fn with_memory(mut self, memory: impl Into<String>) -> Self {
        self.memory = memory.into();
        self
    }

    /// Set the per-command timeout.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// An ephemeral Docker container implementing [`RemoteExecutor`].
pub struct DockerSandbox {
    container_name: String,
    command_timeout: Duration,
}

impl DockerSandbox {
    /// Start a new container for one submission.
    pub async fn start(submission_id: &str, config: SandboxConfig) -> Result<Self, SandboxError> {
        let safe_id: String = submission_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        let ts_suffix = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis()
            % 1_000_000;
        let container_name = format!("reprobench-{}-{}", safe_id, ts_suffix);

        // Remove stale container if it exists
        if let Err(e) = Command::new("docker")
            .args(["rm", "-f", &container_name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
        {
            tracing::debug!(container = %container_name, error = %e, "Failed to remove stale container (may not exist)");
        }

        let memory_flag = format!("--memory={}", config.memory);
        let run_output = Command::new("docker")
            .args([
                "run",
                "-d",
                "--name",
                &container_name,
                &memory_flag,
                &config.image,
                "sleep",
                "infinity",
            ])
            .output()
            .await?;

        if !run_output.status.success() {
            return Err(SandboxError::StartFailed {
                name: container_name,
                message: String::from_utf8_lossy(&run_output.stderr).to_string(),
            });
        }

        tracing::info!(
            container = %container_name,
            image = %config.image,
            "Docker sandbox ready"
        );

        Ok(Self {
            container_name,
            command_timeout: config.command_timeout,
        })
    }

    /// Get the container name (useful for logging).
    pub fn name(&self) -> &str {
        &self.container_name
    }

    /// Destroy the container.
    pub async fn destroy(&self) {
        if let Err(e) = Command::new("docker")
            .args(["rm", "-f", &self.container_name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
        {
            tracing::debug!(container = %self.container_name, error = %e, "Failed to destroy container");
        }
        tracing::debug!(container = %self.container_name, "Docker sandbox destroyed");
    }
}

#[async_trait]
impl RemoteExecutor for DockerSandbox {
    async fn send_shell_command(&self, cmd: &str) -> Result<ExecutionResult, SandboxError> {
        let result = tokio::time::timeout(
            self.command_timeout,
            Command::new("docker")
                .args(["exec", &self.container_name, "bash", "-c", cmd])
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
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

        let cmd = format!("cat '{}'", remote_path);
        let result = self.send_shell_command(&cmd).await?;
        if !result.is_success() {
            return Err(SandboxError::DownloadFailed {
                path: remote_path.to_string(),
                message: result.stderr,
            });
        }
        Ok(result.output)
    }

    async fn upload(&self, bytes: &[u8], remote_path: &str) -> Result<(), SandboxError> {
        validate_remote_path(remote_path)?;

        let mkdir_cmd = format!("mkdir -p \"$(dirname '{}')\"", remote_path);
        self.send_shell_command(&mkdir_cmd).await?;

        let tee_cmd = format!("cat > '{}'", remote_path);
        let mut child = Command::new("docker")
            .args(["exec", "-i", &self.container_name, "bash", "-c", &tee_cmd])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(ref mut stdin) = child.stdin {
            use tokio::io::AsyncWriteExt;
            stdin.write_all(bytes).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(SandboxError::UploadFailed {
                path: remote_path.to_string(),
                message: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        Ok(())
    }
}

/// Ensure the container is removed when dropped (best-effort sync cleanup).
impl Drop for DockerSandbox {
    fn drop(&mut self) {
        let name = self.container_name.clone();
        std::thread::spawn(move || {
            let _ = std::process::Command::new("docker")
                .args(["rm", "-f", &name])
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .status();
        });
    }
}
