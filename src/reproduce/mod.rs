//! Submission reproduction: run an agent's code in a sandbox and bring its
//! artifacts back.
//!
//! [`ReproductionRunner`] drives a submission through provisioning, detached
//! execution with timeout and stall handling, artifact collection and
//! cleanup; [`ReproductionOutput`] is the persisted record of how that went.

pub mod config;
pub mod orchestrator;
pub mod result;

pub use config::ReproductionConfig;
pub use orchestrator::ReproductionRunner;
pub use result::{
    ReproductionFailure, ReproductionMetadata, ReproductionOutput, ReproductionStatus,
};
