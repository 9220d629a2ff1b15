//! reprobench: reproduction and rubric-grading harness for AI-agent submissions.
//!
//! This library executes agent-produced artifacts inside an isolated sandbox,
//! moves file trees between hosts through a size-bounded archive protocol, and
//! grades the resulting artifacts against hierarchical rubrics.

// Core modules
pub mod cli;
pub mod error;
pub mod grading;
pub mod llm;
pub mod reproduce;
pub mod rubric;
pub mod sandbox;
pub mod transfer;

// Re-export commonly used error types
pub use error::{
    EvalError, JudgeError, ReproductionError, RubricError, SandboxError, TransferError,
};
