//! Rubric grading engine.
//!
//! Two independent halves:
//! - scoring dispatch ([`judge`], [`grader`]): assign a score to every valid
//!   leaf of one rubric tree, one judge call per leaf;
//! - tree comparison ([`metrics`]): diff a graded (predicted) tree against a
//!   ground-truth (expected) tree of the same shape and compute accuracy
//!   statistics, overall and stratified by task category.

pub mod grader;
pub mod judge;
pub mod metrics;

pub use grader::{artifact_listing, Grader, GradingSummary, LeafError};
pub use judge::{create_judge, Judge, JudgeConfig, JudgeKind, JudgeRequest};
pub use metrics::{evaluate, EvaluationReport, Metrics};
