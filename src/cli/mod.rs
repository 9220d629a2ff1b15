//! Command-line interface for reprobench.
//!
//! Provides commands for running submissions in a sandbox, grading artifacts
//! against rubrics, and comparing graded trees against ground truth.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli};
