//! Remote sandbox execution layer.
//!
//! A sandbox exposes two primitives: run a shell command and move bytes in or
//! out. Everything above this layer (transfer protocol, orchestrator) is
//! written against the [`RemoteExecutor`] trait so a submission can run inside
//! a Docker container in production and on the local host in development and
//! tests.
//!
//! # Architecture
//!
//! ```text
//! ReproductionRunner → TransferProtocol → RemoteExecutor → Docker container
//! ```
//!
//! One sandbox serves exactly one submission. Leftover state from a previous
//! run (installed packages, files) would silently contaminate results, so a
//! sandbox is destroyed after use, never reset and reused.

pub mod docker;
pub mod local;

use async_trait::async_trait;

use crate::error::SandboxError;

pub use docker::{DockerSandbox, SandboxConfig};
pub use local::LocalExecutor;

/// Result of a single remote shell invocation.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Exit code of the command (-1 when the process was killed or timed out).
    pub exit_code: i32,
    /// Raw stdout bytes.
    pub output: Vec<u8>,
    /// Captured stderr, for diagnostics.
    pub stderr: String,
}

impl ExecutionResult {
    /// Whether the command exited with code zero.
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout decoded lossily as UTF-8.
    pub fn output_lossy(&self) -> String {
        String::from_utf8_lossy(&self.output).to_string()
    }
}

/// Shell-and-bytes interface to an isolated execution environment.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run a shell command and return its result regardless of exit code.
    async fn send_shell_command(&self, cmd: &str) -> Result<ExecutionResult, SandboxError>;

    /// Run a shell command and fail if it exits non-zero.
    async fn check_shell_command(&self, cmd: &str) -> Result<ExecutionResult, SandboxError> {
        let result = self.send_shell_command(cmd).await?;
        if !result.is_success() {
            return Err(SandboxError::NonZeroExit {
                exit_code: result.exit_code,
                stderr: result.stderr.clone(),
            });
        }
        Ok(result)
    }

    /// Download the contents of a remote file.
    async fn download(&self, remote_path: &str) -> Result<Vec<u8>, SandboxError>;

    /// Upload bytes to a remote file, creating parent directories as needed.
    async fn upload(&self, bytes: &[u8], remote_path: &str) -> Result<(), SandboxError>;
}

/// Whether a string contains characters that would break out of a
/// single-quoted shell argument.
pub(crate) fn has_shell_metacharacters(s: &str) -> bool {
    s.chars().any(|ch| {
        matches!(
            ch,
            '\'' | '"' | '`' | '$' | '!' | '&' | '|' | ';' | '(' | ')' | '{' | '}' | '<' | '>'
                | '\\' | '\0' | '\n' | '\r'
        )
    })
}

/// Reject remote paths that would break out of single-quoted shell arguments.
pub(crate) fn validate_remote_path(path: &str) -> Result<(), SandboxError> {
    if path.is_empty() || !path.starts_with('/') {
        return Err(SandboxError::InvalidPath(path.to_string()));
    }
    if path.contains("..") || has_shell_metacharacters(path) {
        return Err(SandboxError::InvalidPath(path.to_string()));
    }
    Ok(())
}
