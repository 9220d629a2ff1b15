//! Judge dispatch: resolving a judge tag into a scoring capability.
//!
//! `dummy` and `random` exist to exercise the pipeline and the metric code
//! without paying for model calls; `simple` is the LLM-backed judge used for
//! real grading runs.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::JudgeError;
use crate::llm::{CompletionRequest, LlmClient, Message, ReasoningEffort};

/// Default model for the `simple` judge.
const DEFAULT_JUDGE_MODEL: &str = "openai/gpt-5.2";

/// Closed set of judge implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum JudgeKind {
    /// Constant score of 1.0; pipeline testing without LLM cost.
    Dummy,
    /// Uniformly random 0/1 score; calibrates the metric code.
    Random,
    /// LLM-backed grading.
    Simple,
}

/// Shared judge parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeConfig {
    /// Backing model for the `simple` judge.
    pub model: String,
    /// Reasoning effort; dropped with a warning on models without reasoning.
    pub reasoning_effort: Option<ReasoningEffort>,
    /// Grade only code artifacts, not run output.
    pub code_only: bool,
    /// Whether reference resources were given to the agent.
    pub resources_provided: bool,
    /// Cap on how many prior sibling scores are shown as context.
    pub max_prior_nodes: Option<usize>,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_JUDGE_MODEL.to_string(),
            reasoning_effort: None,
            code_only: false,
            resources_provided: false,
            max_prior_nodes: None,
        }
    }
}

/// Everything a judge sees about one leaf.
#[derive(Debug, Clone)]
pub struct JudgeRequest<'a> {
    /// Leaf node id.
    pub node_id: &'a str,
    /// The criterion to check.
    pub requirements: &'a str,
    /// Category label of the leaf, if any.
    pub task_category: Option<&'a str>,
    /// Requirements of the ancestor chain, root first.
    pub ancestor_requirements: &'a [String],
    /// Already-assigned scores of preceding siblings, capped by the caller.
    pub prior_sibling_scores: &'a [(String, f64)],
    /// Summary of the artifact under grading.
    pub artifact_summary: &'a str,
}

/// A scoring capability for a single rubric leaf.
#[async_trait]
pub trait Judge: Send + Sync {
    /// Short tag for logging.
    fn name(&self) -> &'static str;

    /// Assign a score to one leaf.
    async fn score(&self, request: &JudgeRequest<'_>) -> Result<f64, JudgeError>;
}

/// Per-subject judge overrides.
///
/// Rubrics for these subjects are far larger and deeper than the rest of the
/// corpus; without a sibling-context cap the judge prompt grows past what the
/// backing model handles well. Unknown subjects get the configured defaults.
const SUBJECT_OVERRIDES: &[(&str, usize)] = &[
    ("adaptive-computation", 8),
    ("test-time-scaling", 8),
    ("sparse-feature-circuits", 12),
];

/// Look up the max-prior-nodes cap for a subject, if one is registered.
pub fn subject_max_prior_nodes(subject: &str) -> Option<usize> {
    SUBJECT_OVERRIDES
        .iter()
        .find(|(name, _)| *name == subject)
        .map(|&(_, cap)| cap)
}

/// Whether a model supports the reasoning-effort knob.
fn model_supports_reasoning(model: &str) -> bool {
    let name = model.rsplit('/').next().unwrap_or(model);
    name.starts_with("o1")
        || name.starts_with("o3")
        || name.starts_with("o4")
        || name.starts_with("gpt-5")
        || name.starts_with("claude")
        || name.starts_with("deepseek-r")
}

/// Resolve a judge tag into a scoring capability.
///
/// Resolution happens once, up front; call sites never branch on the tag
/// again. For the `simple` judge, an unsupported `reasoning_effort` is
/// dropped with a warning rather than failing the run.
pub fn create_judge(
    kind: JudgeKind,
    mut config: JudgeConfig,
    client: Option<Arc<LlmClient>>,
) -> Result<Box<dyn Judge>, JudgeError> {
    match kind {
        JudgeKind::Dummy => Ok(Box::new(DummyJudge)),
        JudgeKind::Random => Ok(Box::new(RandomJudge)),
        JudgeKind::Simple => {
            if config.reasoning_effort.is_some() && !model_supports_reasoning(&config.model) {
                warn!(
                    model = %config.model,
                    "Model does not support reasoning, dropping reasoning_effort"
                );
                config.reasoning_effort = None;
            }
            let client = match client {
                Some(client) => client,
                None => Arc::new(LlmClient::from_env()?),
            };
            Ok(Box::new(SimpleJudge { client, config }))
        }
    }
}

/// Constant-score judge.
struct DummyJudge;

#[async_trait]
impl Judge for DummyJudge {
    fn name(&self) -> &'static str {
        "dummy"
    }

    async fn score(&self, _request: &JudgeRequest<'_>) -> Result<f64, JudgeError> {
        Ok(1.0)
    }
}

/// Uniform 0/1 judge.
struct RandomJudge;

#[async_trait]
impl Judge for RandomJudge {
    fn name(&self) -> &'static str {
        "random"
    }

    async fn score(&self, _request: &JudgeRequest<'_>) -> Result<f64, JudgeError> {
        use rand::RngExt;
        if rand::rng().random_bool(0.5) {
            Ok(1.0)
        } else {
            Ok(0.0)
        }
    }
}

const JUDGE_SYSTEM_PROMPT: &str = "You are grading one criterion of a research-paper \
reproduction rubric. Decide whether the submitted artifact satisfies the criterion. \
Respond with a JSON object of the form {\"score\": 0} or {\"score\": 1} and nothing else.";

/// LLM-backed judge.
struct SimpleJudge {
    client: Arc<LlmClient>,
    config: JudgeConfig,
}

impl SimpleJudge {
    fn build_prompt(&self, request: &JudgeRequest<'_>) -> String {
        let mut prompt = String::new();
        if !request.ancestor_requirements.is_empty() {
            prompt.push_str("Rubric path leading to this criterion:\n");
            for req in request.ancestor_requirements {
                if !req.is_empty() {
                    prompt.push_str("- ");
                    prompt.push_str(req);
                    prompt.push('\n');
                }
            }
            prompt.push('\n');
        }
        if !request.prior_sibling_scores.is_empty() {
            prompt.push_str("Scores already assigned to sibling criteria:\n");
            for (id, score) in request.prior_sibling_scores {
                prompt.push_str(&format!("- {id}: {score}\n"));
            }
            prompt.push('\n');
        }
        prompt.push_str(&format!(
            "Criterion ({}): {}\n\n",
            request.task_category.unwrap_or("uncategorized"),
            request.requirements
        ));
        if self.config.code_only {
            prompt.push_str(
                "Grade from the submitted code alone; no reproduction run output is available.\n",
            );
        }
        if self.config.resources_provided {
            prompt.push_str("The agent was given the paper's reference resources.\n");
        }
        prompt.push_str("\nSubmitted artifact:\n");
        prompt.push_str(request.artifact_summary);
        prompt
    }
}

#[async_trait]
impl Judge for SimpleJudge {
    fn name(&self) -> &'static str {
        "simple"
    }

    async fn score(&self, request: &JudgeRequest<'_>) -> Result<f64, JudgeError> {
        let completion = CompletionRequest::new(
            self.config.model.clone(),
            vec![
                Message::system(JUDGE_SYSTEM_PROMPT),
                Message::user(self.build_prompt(request)),
            ],
        )
        .with_temperature(0.0)
        .with_reasoning_effort(self.config.reasoning_effort);

        let response = self.client.complete(&completion).await?;
        let content = response
            .content
            .ok_or_else(|| JudgeError::ParseError("No content in judge response".to_string()))?;
        parse_score(&content)
    }
}

/// Serialized score shape expected from the judge model.
#[derive(Debug, Deserialize)]
struct ScoreResponse {
    score: f64,
}

/// Extract a `{"score": ...}` object from model output.
///
/// Models occasionally wrap the JSON in prose or code fences; fall back to
/// the outermost brace pair before giving up.
fn parse_score(content: &str) -> Result<f64, JudgeError> {
    let direct: Result<ScoreResponse, _> = serde_json::from_str(content.trim());
    let parsed = match direct {
        Ok(parsed) => parsed,
        Err(_) => {
            let start = content.find('{');
            let end = content.rfind('}');
            match (start, end) {
                (Some(start), Some(end)) if start < end => {
                    serde_json::from_str(&content[start..=end]).map_err(|e| {
                        JudgeError::ParseError(format!("Invalid score JSON: {e}"))
                    })?
                }
                _ => {
                    return Err(JudgeError::ParseError(format!(
                        "No score object in judge output: {}",
                        content.chars().take(200).collect::<String>()
                    )))
                }
            }
        }
    };
    Ok(parsed.score.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request<'a>(summary: &'a str) -> JudgeRequest<'a> {
        JudgeRequest {
            node_id: "leaf-1",
            requirements: "The training loss curve is reproduced",
            task_category: Some("code"),
            ancestor_requirements: &[],
            prior_sibling_scores: &[],
            artifact_summary: summary,
        }
    }

    #[tokio::test]
    async fn test_dummy_judge_constant() {
        let judge = create_judge(JudgeKind::Dummy, JudgeConfig::default(), None).unwrap();
        assert_eq!(judge.name(), "dummy");
        let score = judge.score(&request("files: main.py")).await.unwrap();
        assert_eq!(score, 1.0);
    }

    #[tokio::test]
    async fn test_random_judge_in_range() {
        let judge = create_judge(JudgeKind::Random, JudgeConfig::default(), None).unwrap();
        for _ in 0..20 {
            let score = judge.score(&request("files: main.py")).await.unwrap();
            assert!(score == 0.0 || score == 1.0);
        }
    }

    #[test]
    fn test_model_supports_reasoning() {
        assert!(model_supports_reasoning("openai/o3-mini"));
        assert!(model_supports_reasoning("openai/gpt-5.2"));
        assert!(model_supports_reasoning("anthropic/claude-opus-4.5"));
        assert!(!model_supports_reasoning("meta-llama/llama-3.1-70b-instruct"));
        assert!(!model_supports_reasoning("mistralai/mixtral-8x22b"));
    }

    #[test]
    fn test_subject_overrides() {
        assert_eq!(subject_max_prior_nodes("test-time-scaling"), Some(8));
        assert_eq!(subject_max_prior_nodes("unknown-paper"), None);
    }

    #[test]
    fn test_parse_score_plain() {
        assert_eq!(parse_score(r#"{"score": 1}"#).unwrap(), 1.0);
        assert_eq!(parse_score(r#"{"score": 0}"#).unwrap(), 0.0);
    }

    #[test]
    fn test_parse_score_fenced() {
        let content = "Here is my verdict:\n```json\n{\"score\": 1}\n```";
        assert_eq!(parse_score(content).unwrap(), 1.0);
    }

    #[test]
    fn test_parse_score_clamps() {
        assert_eq!(parse_score(r#"{"score": 3.5}"#).unwrap(), 1.0);
        assert_eq!(parse_score(r#"{"score": -1}"#).unwrap(), 0.0);
    }

    #[test]
    fn test_parse_score_rejects_garbage() {
        assert!(parse_score("the artifact looks fine").is_err());
        assert!(parse_score("{not json}").is_err());
    }
}
