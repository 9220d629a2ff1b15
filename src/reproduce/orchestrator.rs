//! Reproduction run orchestration.
//!
//! Architecture:
//!
//! ```text
//!   Pending
//!      |
//!   Provisioning   install commands, submission upload
//!      |
//!   Executing      detached entrypoint + poll loop
//!      |             - timeout  -> kill, TimedOut
//!      |             - stall    -> kill, restart once, then Failed
//!      |             - exit     -> Succeeded / Failed
//!   Collecting     best-effort artifact download
//!      |
//!   {Succeeded, Failed, TimedOut}
//! ```
//!
//! The entrypoint runs detached under `setsid`/`nohup` with its output
//! redirected to a log file and its exit code written to a sentinel file, so
//! the orchestrator never holds a live connection open across a multi-day
//! run. The poll loop only ever looks at the sentinel file and the log size.
//!
//! The remote work directory is removed on every exit path.

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ReproductionError, TransferError};
use crate::reproduce::config::ReproductionConfig;
use crate::reproduce::result::{
    ReproductionFailure, ReproductionMetadata, ReproductionOutput, ReproductionStatus,
};
use crate::sandbox::{has_shell_metacharacters, RemoteExecutor};
use crate::transfer::{extract_archive, ArchiveTransfer};

/// Name of the collected artifact archive inside the output directory.
const COLLECTED_ARCHIVE: &str = "submission.tar.gz";

/// Name of the extracted artifact tree inside the output directory.
const COLLECTED_DIR: &str = "submission";

/// The entrypoint is interpolated into a quoted shell command; only plain
/// relative paths are accepted.
fn validate_entrypoint(entrypoint: &str) -> Result<(), ReproductionError> {
    if entrypoint.is_empty()
        || entrypoint.starts_with('/')
        || entrypoint.contains("..")
        || has_shell_metacharacters(entrypoint)
    {
        return Err(ReproductionError::InvalidEntrypoint(entrypoint.to_string()));
    }
    Ok(())
}

/// Drives one submission through the reproduction lifecycle.
pub struct ReproductionRunner {
    config: ReproductionConfig,
}

/// How the execution phase ended.
#[derive(Debug, Clone, Copy)]
enum ExecOutcome {
    Finished { exit_code: i32, retried: bool },
    TimedOut,
    Stalled,
}

impl ReproductionRunner {
    pub fn new(config: ReproductionConfig) -> Self {
        Self { config }
    }

    /// Run a submission to a terminal state and persist the record.
    ///
    /// Domain failures (provisioning, timeout, stall, non-zero exit, transfer,
    /// collection) come back as an unsuccessful [`ReproductionOutput`]; `Err`
    /// is reserved for infrastructure trouble such as a dead sandbox.
    pub async fn run(
        &self,
        exec: &dyn RemoteExecutor,
        submission_dir: &Path,
        output_dir: &Path,
    ) -> Result<ReproductionOutput, ReproductionError> {
        validate_entrypoint(&self.config.entrypoint)?;

        let run_id = Uuid::new_v4();
        let work_dir = format!("/tmp/reprobench-run-{run_id}");
        info!(work_dir = %work_dir, "Starting reproduction run");

        let result = self
            .run_to_completion(exec, &work_dir, submission_dir, output_dir)
            .await;

        // Cleanup happens on every exit path, success or not.
        let rm_cmd = format!("rm -rf '{work_dir}'");
        if let Err(e) = exec.send_shell_command(&rm_cmd).await {
            debug!(error = %e, "Failed to remove remote work directory");
        }

        let output = result?;
        let record = output.save(output_dir)?;
        info!(
            status = %output.status,
            success = output.success(),
            record = %record.display(),
            "Reproduction run finished"
        );
        Ok(output)
    }

    async fn run_to_completion(
        &self,
        exec: &dyn RemoteExecutor,
        work_dir: &str,
        submission_dir: &Path,
        output_dir: &Path,
    ) -> Result<ReproductionOutput, ReproductionError> {
        info!(status = %ReproductionStatus::Provisioning, "Provisioning sandbox");
        for cmd in &self.config.install_commands {
            if let Err(e) = exec.check_shell_command(cmd).await {
                warn!(command = %cmd, error = %e, "Install command failed");
                return Ok(ReproductionOutput::unsuccessful(
                    ReproductionStatus::Failed,
                    ReproductionFailure::Provisioning {
                        message: e.to_string(),
                    },
                ));
            }
        }

        let submission_remote = format!("{work_dir}/{COLLECTED_DIR}");
        let transfer = ArchiveTransfer::new(exec).with_max_file_bytes(self.config.max_file_bytes);
        if let Err(e) = transfer.upload_dir(submission_dir, &submission_remote).await {
            warn!(error = %e, "Submission upload failed");
            return Ok(ReproductionOutput::unsuccessful(
                ReproductionStatus::Failed,
                ReproductionFailure::Transfer {
                    message: e.to_string(),
                },
            ));
        }

        info!(status = %ReproductionStatus::Executing, entrypoint = %self.config.entrypoint, "Executing entrypoint");
        let started_at = Utc::now();
        let outcome = self.execute(exec, work_dir, &submission_remote).await?;
        let finished_at = Utc::now();

        let (status, failure, metadata) = match outcome {
            ExecOutcome::Finished { exit_code: 0, retried } => (
                ReproductionStatus::Succeeded,
                None,
                Some(ReproductionMetadata {
                    started_at,
                    finished_at,
                    duration_secs: (finished_at - started_at).num_seconds().max(0) as u64,
                    exit_code: 0,
                    retried,
                }),
            ),
            ExecOutcome::Finished { exit_code, .. } => (
                ReproductionStatus::Failed,
                Some(ReproductionFailure::Execution { exit_code }),
                None,
            ),
            ExecOutcome::TimedOut => (
                ReproductionStatus::TimedOut,
                Some(ReproductionFailure::Timeout {
                    limit_secs: self.config.timeout.as_secs(),
                }),
                None,
            ),
            ExecOutcome::Stalled => (
                ReproductionStatus::Failed,
                Some(ReproductionFailure::Stalled {
                    threshold_secs: self.config.retry_threshold.as_secs(),
                }),
                None,
            ),
        };

        // Artifacts come back regardless of how execution ended; a partial
        // tree from a failed run is still worth inspecting.
        info!(status = %ReproductionStatus::Collecting, "Collecting artifacts");
        let collected = self.collect(exec, &submission_remote, output_dir).await;

        match (status, collected) {
            (ReproductionStatus::Succeeded, Ok(path)) => Ok(ReproductionOutput {
                executed_submission: Some(path),
                metadata,
                status,
                failure: None,
            }),
            (ReproductionStatus::Succeeded, Err(e)) => {
                warn!(error = %e, "Artifact collection failed after successful run");
                Ok(ReproductionOutput {
                    executed_submission: None,
                    metadata: None,
                    status,
                    failure: Some(ReproductionFailure::Collection {
                        message: e.to_string(),
                    }),
                })
            }
            (status, collected) => {
                if let Err(e) = collected {
                    debug!(error = %e, "Artifact collection failed after unsuccessful run");
                }
                Ok(ReproductionOutput {
                    executed_submission: None,
                    metadata: None,
                    status,
                    failure,
                })
            }
        }
    }

    /// Launch the entrypoint detached and poll it to completion.
    async fn execute(
        &self,
        exec: &dyn RemoteExecutor,
        work_dir: &str,
        submission_remote: &str,
    ) -> Result<ExecOutcome, ReproductionError> {
        let log_file = format!("{work_dir}/repro.log");
        let exit_file = format!("{work_dir}/repro.exit");
        let pid_file = format!("{work_dir}/repro.pid");

        self.launch(exec, submission_remote, &log_file, &exit_file, &pid_file)
            .await?;

        let started = Instant::now();
        let mut last_size = 0u64;
        let mut last_progress = Instant::now();
        let mut retried = false;

        loop {
            tokio::time::sleep(self.config.poll_interval).await;

            // Completion is checked before the timeout, so an entrypoint that
            // finishes right at the deadline still counts as finished.
            let exit_check = exec
                .send_shell_command(&format!("cat '{exit_file}' 2>/dev/null"))
                .await?;
            if exit_check.is_success() {
                let exit_code = exit_check.output_lossy().trim().parse().unwrap_or(-1);
                debug!(exit_code = exit_code, "Entrypoint finished");
                return Ok(ExecOutcome::Finished { exit_code, retried });
            }

            if started.elapsed() >= self.config.timeout {
                warn!(
                    limit_secs = self.config.timeout.as_secs(),
                    "Reproduction timed out"
                );
                self.kill(exec, &pid_file).await;
                return Ok(ExecOutcome::TimedOut);
            }

            let size = self.log_size(exec, &log_file).await?;
            if size != last_size {
                last_size = size;
                last_progress = Instant::now();
            } else if last_progress.elapsed() >= self.config.retry_threshold {
                self.kill(exec, &pid_file).await;
                if retried {
                    warn!("Entrypoint stalled again after restart, giving up");
                    return Ok(ExecOutcome::Stalled);
                }
                warn!(
                    threshold_secs = self.config.retry_threshold.as_secs(),
                    "No log progress, restarting entrypoint"
                );
                self.launch(exec, submission_remote, &log_file, &exit_file, &pid_file)
                    .await?;
                retried = true;
                last_size = 0;
                last_progress = Instant::now();
            }
        }
    }

    /// Start the entrypoint in its own session, detached from the connection.
    ///
    /// `setsid` puts the whole run in one process group so a later kill
    /// reaches every descendant. The detached shell records its own pid
    /// (the session leader, hence the group id) and writes the entrypoint's
    /// exit code to a sentinel file when it finishes.
    async fn launch(
        &self,
        exec: &dyn RemoteExecutor,
        submission_remote: &str,
        log_file: &str,
        exit_file: &str,
        pid_file: &str,
    ) -> Result<(), ReproductionError> {
        let entrypoint = &self.config.entrypoint;
        let cmd = format!(
            "cd '{submission_remote}' && setsid nohup bash -c \
             \"echo \\$\\$ > '{pid_file}'; bash '{entrypoint}' > '{log_file}' 2>&1; \
             echo \\$? > '{exit_file}'\" > /dev/null 2>&1 &"
        );
        exec.check_shell_command(&cmd).await?;
        Ok(())
    }

    /// Kill the entrypoint's process group (best-effort).
    async fn kill(&self, exec: &dyn RemoteExecutor, pid_file: &str) {
        let cmd = format!(
            "[ -f '{pid_file}' ] && kill -9 -- -$(cat '{pid_file}') > /dev/null 2>&1; true"
        );
        if let Err(e) = exec.send_shell_command(&cmd).await {
            debug!(error = %e, "Failed to stop entrypoint");
        }
    }

    /// Current byte size of the entrypoint log; 0 if it does not exist yet.
    async fn log_size(
        &self,
        exec: &dyn RemoteExecutor,
        log_file: &str,
    ) -> Result<u64, ReproductionError> {
        let result = exec
            .send_shell_command(&format!("wc -c < '{log_file}' 2>/dev/null || echo 0"))
            .await?;
        Ok(result.output_lossy().trim().parse().unwrap_or(0))
    }

    /// Download and extract the remote submission tree into `output_dir`.
    async fn collect(
        &self,
        exec: &dyn RemoteExecutor,
        submission_remote: &str,
        output_dir: &Path,
    ) -> Result<PathBuf, TransferError> {
        let transfer = ArchiveTransfer::new(exec).with_max_file_bytes(self.config.max_file_bytes);
        let archive = output_dir.join(COLLECTED_ARCHIVE);
        transfer.download_dir(submission_remote, &archive).await?;

        let dest = output_dir.join(COLLECTED_DIR);
        extract_archive(&archive, &dest)?;
        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entrypoint_validation() {
        assert!(validate_entrypoint("reproduce.sh").is_ok());
        assert!(validate_entrypoint("scripts/run.sh").is_ok());
        assert!(validate_entrypoint("").is_err());
        assert!(validate_entrypoint("/etc/passwd").is_err());
        assert!(validate_entrypoint("../escape.sh").is_err());
        assert!(validate_entrypoint("run'; echo pwned'.sh").is_err());
        assert!(validate_entrypoint("run$(id).sh").is_err());
    }
}
