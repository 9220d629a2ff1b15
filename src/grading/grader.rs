//! Per-leaf scoring dispatch over a rubric tree.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use walkdir::WalkDir;

use crate::grading::judge::{subject_max_prior_nodes, Judge, JudgeRequest};
use crate::rubric::TaskTree;

/// Cap on how many files the artifact summary lists.
const MAX_LISTED_FILES: usize = 400;

/// A judge failure confined to one leaf.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeafError {
    /// Id of the leaf that failed to grade.
    pub id: String,
    /// What went wrong.
    pub message: String,
}

/// Outcome of grading one tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GradingSummary {
    /// Number of leaves that received a score.
    pub graded: usize,
    /// Leaves whose judge invocation failed; siblings are unaffected.
    pub errors: Vec<LeafError>,
}

/// Grades every valid leaf of a rubric tree with one judge.
pub struct Grader {
    judge: Box<dyn Judge>,
    max_prior_nodes: Option<usize>,
}

impl Grader {
    /// Create a grader with no sibling-context cap.
    pub fn new(judge: Box<dyn Judge>) -> Self {
        Self {
            judge,
            max_prior_nodes: None,
        }
    }

    /// Cap how many prior sibling scores each judge call sees.
    pub fn with_max_prior_nodes(mut self, cap: Option<usize>) -> Self {
        self.max_prior_nodes = cap;
        self
    }

    /// Apply the per-subject override table on top of the configured cap.
    ///
    /// A registered subject wins over the configured value; unknown subjects
    /// keep it.
    pub fn for_subject(mut self, subject: &str) -> Self {
        if let Some(cap) = subject_max_prior_nodes(subject) {
            debug!(subject = subject, max_prior_nodes = cap, "Applying subject override");
            self.max_prior_nodes = Some(cap);
        }
        self
    }

    /// Score every valid, ungraded leaf in place.
    ///
    /// Leaves are graded independently; a judge error on one leaf is recorded
    /// and never disturbs scores already assigned to its siblings.
    pub async fn grade(&self, tree: &mut TaskTree, artifact_summary: &str) -> GradingSummary {
        let mut summary = GradingSummary::default();
        let leaves = tree.valid_leaves();
        info!(
            judge = self.judge.name(),
            leaves = leaves.len(),
            "Grading rubric tree"
        );

        for handle in leaves {
            if tree.node(handle).score().is_some() {
                continue;
            }

            let ancestor_requirements: Vec<String> = tree
                .ancestors(handle)
                .into_iter()
                .map(|h| tree.node(h).requirements.clone())
                .collect();

            let mut prior_sibling_scores: Vec<(String, f64)> = tree
                .prior_siblings(handle)
                .into_iter()
                .filter_map(|h| {
                    let sibling = tree.node(h);
                    sibling.score().map(|s| (sibling.id.clone(), s))
                })
                .collect();
            if let Some(cap) = self.max_prior_nodes {
                let len = prior_sibling_scores.len();
                if len > cap {
                    prior_sibling_scores.drain(..len - cap);
                }
            }

            let node = tree.node(handle);
            let request = JudgeRequest {
                node_id: &node.id,
                requirements: &node.requirements,
                task_category: node.task_category.as_deref(),
                ancestor_requirements: &ancestor_requirements,
                prior_sibling_scores: &prior_sibling_scores,
                artifact_summary,
            };

            match self.judge.score(&request).await {
                Ok(score) => {
                    debug!(node = %node.id, score = score, "Leaf graded");
                    let id = node.id.clone();
                    if let Err(e) = tree.set_score(handle, score) {
                        summary.errors.push(LeafError {
                            id,
                            message: e.to_string(),
                        });
                    } else {
                        summary.graded += 1;
                    }
                }
                Err(e) => {
                    error!(node = %node.id, error = %e, "Judge failed on leaf");
                    summary.errors.push(LeafError {
                        id: node.id.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        info!(
            graded = summary.graded,
            errors = summary.errors.len(),
            "Grading complete"
        );
        summary
    }
}

/// Build a flat file listing of an artifact directory for judge context.
pub fn artifact_listing(dir: &Path) -> String {
    let mut lines = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(dir) {
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            lines.push(format!("{} ({} bytes)", rel.display(), size));
        }
        if lines.len() >= MAX_LISTED_FILES {
            lines.push("... (listing truncated)".to_string());
            break;
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JudgeError;
    use crate::grading::judge::{create_judge, JudgeConfig, JudgeKind};
    use crate::rubric::RubricSpec;
    use async_trait::async_trait;
    use std::fs;

    fn leaf(id: &str) -> RubricSpec {
        RubricSpec {
            id: id.to_string(),
            task_category: Some("code".to_string()),
            requirements: format!("check {id}"),
            sub_tasks: Vec::new(),
            score: None,
            valid_score: true,
        }
    }

    fn tree(leaves: Vec<RubricSpec>) -> TaskTree {
        let spec = RubricSpec {
            id: "root".to_string(),
            task_category: None,
            requirements: "overall".to_string(),
            sub_tasks: leaves,
            score: None,
            valid_score: true,
        };
        TaskTree::from_spec(&spec).unwrap()
    }

    /// Fails on one specific leaf, scores every other leaf 1.0.
    struct FlakyJudge {
        failing_id: String,
    }

    #[async_trait]
    impl Judge for FlakyJudge {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn score(&self, request: &JudgeRequest<'_>) -> Result<f64, JudgeError> {
            if request.node_id == self.failing_id {
                Err(JudgeError::RequestFailed("judge crashed".to_string()))
            } else {
                Ok(1.0)
            }
        }
    }

    #[tokio::test]
    async fn test_grade_all_leaves() {
        let judge = create_judge(JudgeKind::Dummy, JudgeConfig::default(), None).unwrap();
        let mut tree = tree(vec![leaf("a"), leaf("b"), leaf("c")]);

        let summary = Grader::new(judge).grade(&mut tree, "files").await;

        assert_eq!(summary.graded, 3);
        assert!(summary.errors.is_empty());
        for id in ["a", "b", "c"] {
            let h = tree.find(id).unwrap();
            assert_eq!(tree.node(h).score(), Some(1.0));
        }
    }

    #[tokio::test]
    async fn test_judge_error_isolated_to_one_leaf() {
        let judge = Box::new(FlakyJudge {
            failing_id: "b".to_string(),
        });
        let mut tree = tree(vec![leaf("a"), leaf("b"), leaf("c")]);

        let summary = Grader::new(judge).grade(&mut tree, "files").await;

        assert_eq!(summary.graded, 2);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].id, "b");

        let a = tree.find("a").unwrap();
        let b = tree.find("b").unwrap();
        let c = tree.find("c").unwrap();
        assert_eq!(tree.node(a).score(), Some(1.0));
        assert_eq!(tree.node(b).score(), None);
        assert_eq!(tree.node(c).score(), Some(1.0));
    }

    #[tokio::test]
    async fn test_already_scored_leaves_skipped() {
        let judge = create_judge(JudgeKind::Dummy, JudgeConfig::default(), None).unwrap();
        let mut scored = leaf("a");
        scored.score = Some(0.0);
        let mut tree = tree(vec![scored, leaf("b")]);

        let summary = Grader::new(judge).grade(&mut tree, "files").await;

        assert_eq!(summary.graded, 1);
        let a = tree.find("a").unwrap();
        assert_eq!(tree.node(a).score(), Some(0.0));
    }

    /// Records how many prior sibling scores each call saw.
    struct ContextProbe {
        seen: std::sync::Arc<std::sync::Mutex<Vec<usize>>>,
    }

    #[async_trait]
    impl Judge for ContextProbe {
        fn name(&self) -> &'static str {
            "probe"
        }

        async fn score(&self, request: &JudgeRequest<'_>) -> Result<f64, JudgeError> {
            self.seen
                .lock()
                .unwrap()
                .push(request.prior_sibling_scores.len());
            Ok(1.0)
        }
    }

    #[tokio::test]
    async fn test_prior_sibling_cap() {
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let judge = Box::new(ContextProbe { seen: seen.clone() });
        let mut tree = tree(vec![leaf("a"), leaf("b"), leaf("c"), leaf("d")]);

        let _ = Grader::new(judge)
            .with_max_prior_nodes(Some(2))
            .grade(&mut tree, "files")
            .await;

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 2]);
    }

    #[test]
    fn test_artifact_listing() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.py"), "print(1)").unwrap();
        fs::create_dir_all(dir.path().join("results")).unwrap();
        fs::write(dir.path().join("results/out.json"), "{}").unwrap();

        let listing = artifact_listing(dir.path());
        assert!(listing.contains("main.py"));
        assert!(listing.contains("results/out.json"));
    }
}
