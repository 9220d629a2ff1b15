//! Error types for reprobench operations.
//!
//! Defines error types for all major subsystems:
//! - Remote sandbox execution
//! - Archive transfer between hosts
//! - Reproduction orchestration
//! - Rubric tree construction and grading
//! - Judge / LLM API interactions
//! - Tree comparison and metric computation

use thiserror::Error;

/// Errors that can occur while talking to a remote sandbox.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Failed to start sandbox '{name}': {message}")]
    StartFailed { name: String, message: String },

    #[error("Command exited with non-zero code {exit_code}: {stderr}")]
    NonZeroExit { exit_code: i32, stderr: String },

    #[error("Command timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Failed to upload to '{path}': {message}")]
    UploadFailed { path: String, message: String },

    #[error("Failed to download '{path}': {message}")]
    DownloadFailed { path: String, message: String },

    #[error("Invalid remote path '{0}'")]
    InvalidPath(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur during archive transfer.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Archive build failed with exit code {exit_code}: {stderr}")]
    ArchiveFailed { exit_code: i32, stderr: String },

    #[error("Archive extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Archive has unexpected root '{found}', expected '{expected}'")]
    BadArchiveRoot { expected: String, found: String },

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while orchestrating a reproduction run.
#[derive(Debug, Error)]
pub enum ReproductionError {
    #[error("Provisioning failed: {0}")]
    Provisioning(String),

    #[error("Invalid entrypoint '{0}': must be a relative path without shell metacharacters")]
    InvalidEntrypoint(String),

    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur while building or mutating a rubric tree.
#[derive(Debug, Error)]
pub enum RubricError {
    #[error("Duplicate node id '{0}' in rubric tree")]
    DuplicateId(String),

    #[error("Node '{0}' not found in tree")]
    NodeNotFound(String),

    #[error("Score already assigned to node '{0}'")]
    ScoreAlreadySet(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur during a judge invocation.
#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("Missing API key: REPROBENCH_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse judge response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },
}

/// Errors that can occur during tree comparison and metric computation.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("Predicted leaf '{0}' has no counterpart in the expected tree")]
    ShapeMismatch(String),

    #[error("Leaf '{0}' has no score assigned")]
    MissingScore(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
