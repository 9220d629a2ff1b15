//! OpenAI-compatible chat-completions client used by the model judge.

use std::env;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::JudgeError;
use crate::llm::retry::RetryPolicy;

/// Default API base (OpenRouter-compatible) when `REPROBENCH_API_BASE` is unset.
pub const DEFAULT_API_BASE: &str = "https://openrouter.ai/api/v1";

/// Request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// A message in a conversation with an LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender (e.g., "system", "user", "assistant").
    pub role: String,
    /// Content of the message.
    pub content: String,
}

impl Message {
    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Reasoning-effort hint for models that support extended reasoning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

/// Request for a chat completion.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    /// Model identifier.
    pub model: String,
    /// Conversation messages.
    pub messages: Vec<Message>,
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Maximum number of tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Reasoning effort, for models that support it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
}

impl CompletionRequest {
    /// Create a new request with default sampling parameters.
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
            reasoning_effort: None,
        }
    }

    /// Set the temperature.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the max tokens.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the reasoning effort.
    pub fn with_reasoning_effort(mut self, effort: Option<ReasoningEffort>) -> Self {
        self.reasoning_effort = effort;
        self
    }
}

/// Token usage statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Response from a completion request.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Model that produced the response.
    pub model: String,
    /// Content of the first choice, if any.
    pub content: Option<String>,
    /// Token usage statistics.
    pub usage: Usage,
}

/// Client for an OpenAI-compatible chat-completions API.
pub struct LlmClient {
    client: Client,
    api_base: String,
    api_key: String,
    retry: RetryPolicy,
}

impl LlmClient {
    /// Create a client with explicit configuration.
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .expect("Failed to build HTTP client - system TLS configuration error"),
            api_base: api_base.into(),
            api_key: api_key.into(),
            retry: RetryPolicy::default(),
        }
    }

    /// Create a client from environment variables.
    ///
    /// Reads `REPROBENCH_API_KEY` (required) and `REPROBENCH_API_BASE`
    /// (defaults to the OpenRouter endpoint).
    pub fn from_env() -> Result<Self, JudgeError> {
        let api_key = env::var("REPROBENCH_API_KEY").map_err(|_| JudgeError::MissingApiKey)?;
        let api_base =
            env::var("REPROBENCH_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_string());
        Ok(Self::new(api_base, api_key))
    }

    /// Override the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Get the API base URL.
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Run a completion, retrying transient failures with backoff.
    pub async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, JudgeError> {
        self.retry
            .run(is_transient_error, || self.execute_request(request))
            .await
    }

    /// Execute a single request (no retry logic).
    async fn execute_request(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, JudgeError> {
        let url = format!("{}/chat/completions", self.api_base);

        let http_response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", "https://reprobench.local")
            .header("X-Title", "reprobench")
            .json(request)
            .send()
            .await
            .map_err(|e| JudgeError::RequestFailed(e.to_string()))?;

        let status = http_response.status();

        if !status.is_success() {
            let status_code = status.as_u16();
            let error_text = http_response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());

            if let Ok(error_response) = serde_json::from_str::<ApiErrorResponse>(&error_text) {
                if status_code == 429 {
                    return Err(JudgeError::RateLimited(error_response.error.message));
                }
                return Err(JudgeError::ApiError {
                    code: status_code,
                    message: error_response.error.message,
                });
            }

            return Err(JudgeError::ApiError {
                code: status_code,
                message: error_text,
            });
        }

        let api_response: ApiResponse = http_response
            .json()
            .await
            .map_err(|e| JudgeError::ParseError(format!("Failed to parse API response: {}", e)))?;

        Ok(CompletionResponse {
            model: api_response.model,
            content: api_response
                .choices
                .into_iter()
                .next()
                .map(|c| c.message.content),
            usage: api_response.usage.unwrap_or_default(),
        })
    }
}

/// Check if an error is transient and should be retried.
fn is_transient_error(error: &JudgeError) -> bool {
    match error {
        JudgeError::RequestFailed(msg) => {
            msg.contains("timeout")
                || msg.contains("timed out")
                || msg.contains("connection")
                || msg.contains("Connection refused")
        }
        JudgeError::RateLimited(_) => true,
        JudgeError::ApiError { code, .. } => *code >= 500 || *code == 429,
        _ => false,
    }
}

/// Internal response structure from the API.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    content: String,
}

/// Error response from the API.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}
