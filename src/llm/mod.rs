//! LLM client backing the model-based judge.
//!
//! The client handle is constructed once per process and passed by reference
//! into every judge invocation; there is no global singleton, which keeps the
//! judge trivially substitutable with a fake in tests.

pub mod client;
pub mod retry;

pub use client::{
    CompletionRequest, CompletionResponse, LlmClient, Message, ReasoningEffort, Usage,
    DEFAULT_API_BASE,
};
pub use retry::RetryPolicy;
