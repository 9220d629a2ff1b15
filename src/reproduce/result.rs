//! Reproduction run outcome types.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ReproductionError;

/// File name the run record is persisted under.
pub const OUTPUT_FILE: &str = "reproduction.json";

/// Lifecycle state of a reproduction run.
///
/// The terminal states record the outcome of the execution phase only;
/// collection trouble is reported separately through
/// [`ReproductionFailure::Collection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReproductionStatus {
    Pending,
    Provisioning,
    Executing,
    Collecting,
    Succeeded,
    Failed,
    TimedOut,
}

impl fmt::Display for ReproductionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Provisioning => "provisioning",
            Self::Executing => "executing",
            Self::Collecting => "collecting",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        };
        f.write_str(s)
    }
}

/// Classified cause of an unsuccessful run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReproductionFailure {
    /// An install command failed before the submission ran.
    Provisioning { message: String },
    /// The wall-clock budget ran out.
    Timeout { limit_secs: u64 },
    /// The log stopped growing twice; one restart is the limit.
    Stalled { threshold_secs: u64 },
    /// The entrypoint exited non-zero.
    Execution { exit_code: i32 },
    /// Moving the submission into the sandbox failed.
    Transfer { message: String },
    /// The run finished but its artifacts could not be brought back.
    Collection { message: String },
}

/// Timing and exit details of a completed execution phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReproductionMetadata {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_secs: u64,
    pub exit_code: i32,
    /// Whether the entrypoint was restarted after a stall.
    pub retried: bool,
}

/// Persisted record of one reproduction run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReproductionOutput {
    /// Where the collected submission tree landed locally; absent unless the
    /// run succeeded and its artifacts came back.
    pub executed_submission: Option<PathBuf>,
    /// Present exactly when the run is usable for grading.
    pub metadata: Option<ReproductionMetadata>,
    /// Terminal lifecycle state.
    pub status: ReproductionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<ReproductionFailure>,
}

impl ReproductionOutput {
    /// Shorthand for the unsuccessful terminal shapes.
    pub(crate) fn unsuccessful(status: ReproductionStatus, failure: ReproductionFailure) -> Self {
        Self {
            executed_submission: None,
            metadata: None,
            status,
            failure: Some(failure),
        }
    }

    /// A run is usable for grading exactly when metadata is present.
    pub fn success(&self) -> bool {
        self.metadata.is_some()
    }

    /// Persist the record as pretty JSON under `dir`.
    pub fn save(&self, dir: &Path) -> Result<PathBuf, ReproductionError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(OUTPUT_FILE);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;
        Ok(path)
    }

    /// Load a previously persisted record.
    pub fn load(path: &Path) -> Result<Self, ReproductionError> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}
