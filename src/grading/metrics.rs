//! Tree comparison and stratified accuracy metrics.
//!
//! `evaluate` diffs a graded (predicted) tree against a ground-truth
//! (expected) tree built from the same rubric. Leaves are paired by id, so
//! the walk is order-independent across siblings; every valid leaf appears in
//! exactly one category list and exactly once overall.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::EvalError;
use crate::rubric::{NodeHandle, TaskTree};

/// Category key for leaves without a `task_category` label.
const UNCATEGORIZED: &str = "uncategorized";

/// Scores at or above this threshold count as the positive class.
const POSITIVE_THRESHOLD: f64 = 0.5;

/// Classification metrics over one list of (predicted, expected) score pairs.
///
/// Precision, recall and F1 are taken with respect to the positive class;
/// a zero denominator yields 0.0 rather than an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub num_positives: usize,
    pub num_negatives: usize,
    pub num_samples: usize,
}

impl Metrics {
    /// Compute metrics from (predicted, expected) score pairs.
    pub fn from_pairs(pairs: &[(f64, f64)]) -> Self {
        let mut tp = 0usize;
        let mut fp = 0usize;
        let mut fn_ = 0usize;
        let mut tn = 0usize;

        for &(predicted, expected) in pairs {
            let predicted = predicted >= POSITIVE_THRESHOLD;
            let expected = expected >= POSITIVE_THRESHOLD;
            match (predicted, expected) {
                (true, true) => tp += 1,
                (true, false) => fp += 1,
                (false, true) => fn_ += 1,
                (false, false) => tn += 1,
            }
        }

        let num_samples = pairs.len();
        let accuracy = ratio(tp + tn, num_samples);
        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        Self {
            accuracy,
            precision,
            recall,
            f1,
            num_positives: tp + fn_,
            num_negatives: fp + tn,
            num_samples,
        }
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Overall metrics plus one metric set per task category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// Metrics over every valid leaf.
    #[serde(flatten)]
    pub overall: Metrics,
    /// Metrics per task category; categories partition the overall pairs.
    pub stratified: BTreeMap<String, Metrics>,
}

/// Compare a predicted tree against an expected tree of the same shape.
///
/// Walks the predicted tree depth-first; a node with `valid_score = false`
/// is skipped together with its entire subtree. Each valid leaf is paired
/// with the expected node of the same id — a missing id means the two trees
/// are not shape-compatible and evaluation halts with
/// [`EvalError::ShapeMismatch`]. Pure function of its inputs.
pub fn evaluate(predicted: &TaskTree, expected: &TaskTree) -> Result<EvaluationReport, EvalError> {
    let mut overall = Vec::new();
    let mut per_category: BTreeMap<String, Vec<(f64, f64)>> = BTreeMap::new();
    collect_pairs(predicted, expected, predicted.root(), &mut overall, &mut per_category)?;

    Ok(EvaluationReport {
        overall: Metrics::from_pairs(&overall),
        stratified: per_category
            .into_iter()
            .map(|(category, pairs)| (category, Metrics::from_pairs(&pairs)))
            .collect(),
    })
}

fn collect_pairs(
    predicted: &TaskTree,
    expected: &TaskTree,
    handle: NodeHandle,
    overall: &mut Vec<(f64, f64)>,
    per_category: &mut BTreeMap<String, Vec<(f64, f64)>>,
) -> Result<(), EvalError> {
    let node = predicted.node(handle);
    if !node.valid_score {
        return Ok(());
    }

    if !node.is_leaf() {
        for &child in node.sub_tasks() {
            collect_pairs(predicted, expected, child, overall, per_category)?;
        }
        return Ok(());
    }

    let counterpart = expected
        .find(&node.id)
        .ok_or_else(|| EvalError::ShapeMismatch(node.id.clone()))?;
    let predicted_score = node
        .score()
        .ok_or_else(|| EvalError::MissingScore(node.id.clone()))?;
    let expected_score = expected
        .node(counterpart)
        .score()
        .ok_or_else(|| EvalError::MissingScore(node.id.clone()))?;

    let pair = (predicted_score, expected_score);
    overall.push(pair);
    per_category
        .entry(
            node.task_category
                .clone()
                .unwrap_or_else(|| UNCATEGORIZED.to_string()),
        )
        .or_default()
        .push(pair);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rubric::RubricSpec;

    fn leaf(id: &str, category: &str, score: f64) -> RubricSpec {
        RubricSpec {
            id: id.to_string(),
            task_category: Some(category.to_string()),
            requirements: String::new(),
            sub_tasks: Vec::new(),
            score: Some(score),
            valid_score: true,
        }
    }

    fn tree(children: Vec<RubricSpec>) -> TaskTree {
        let spec = RubricSpec {
            id: "root".to_string(),
            task_category: None,
            requirements: String::new(),
            sub_tasks: children,
            score: None,
            valid_score: true,
        };
        TaskTree::from_spec(&spec).unwrap()
    }

    #[test]
    fn test_perfect_agreement() {
        let predicted = tree(vec![leaf("a", "code", 1.0), leaf("b", "code", 0.0)]);
        let expected = tree(vec![leaf("a", "code", 1.0), leaf("b", "code", 0.0)]);

        let report = evaluate(&predicted, &expected).unwrap();
        assert_eq!(report.overall.accuracy, 1.0);
        assert_eq!(report.overall.f1, 1.0);
        assert_eq!(report.overall.num_samples, 2);
        assert_eq!(report.overall.num_positives, 1);
        assert_eq!(report.overall.num_negatives, 1);
    }

    #[test]
    fn test_category_stratification() {
        let predicted = tree(vec![
            leaf("w1", "writeup", 1.0),
            leaf("w2", "writeup", 0.0),
            leaf("c1", "code", 1.0),
        ]);
        let expected = tree(vec![
            leaf("w1", "writeup", 1.0),
            leaf("w2", "writeup", 1.0),
            leaf("c1", "code", 1.0),
        ]);

        let report = evaluate(&predicted, &expected).unwrap();
        assert_eq!(report.stratified["writeup"].accuracy, 0.5);
        assert_eq!(report.stratified["code"].accuracy, 1.0);
        assert!((report.overall.accuracy - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_division_when_positive_class_absent() {
        // All samples negative and correctly predicted: no positives anywhere,
        // so precision and recall fall to the zero-division clause.
        let predicted = tree(vec![leaf("a", "code", 0.0), leaf("b", "code", 0.0)]);
        let expected = tree(vec![leaf("a", "code", 0.0), leaf("b", "code", 0.0)]);

        let report = evaluate(&predicted, &expected).unwrap();
        assert_eq!(report.overall.accuracy, 1.0);
        assert_eq!(report.overall.precision, 0.0);
        assert_eq!(report.overall.recall, 0.0);
        assert_eq!(report.overall.f1, 0.0);
        assert_eq!(report.overall.num_positives, 0);
        assert_eq!(report.overall.num_negatives, 2);
    }

    #[test]
    fn test_shape_mismatch_fails_loudly() {
        let predicted = tree(vec![leaf("a", "code", 1.0), leaf("rogue", "code", 1.0)]);
        let expected = tree(vec![leaf("a", "code", 1.0)]);

        let err = evaluate(&predicted, &expected).unwrap_err();
        assert!(matches!(err, EvalError::ShapeMismatch(id) if id == "rogue"));
    }

    #[test]
    fn test_invalid_subtree_excluded() {
        let skipped = RubricSpec {
            id: "skipped".to_string(),
            task_category: None,
            requirements: String::new(),
            sub_tasks: vec![leaf("hidden", "code", 1.0)],
            score: None,
            valid_score: false,
        };
        // The hidden leaf disagrees with expectation; excluded, it must not count.
        let predicted = tree(vec![leaf("a", "code", 1.0), skipped.clone()]);
        let expected = tree(vec![leaf("a", "code", 1.0), {
            let mut s = skipped;
            s.sub_tasks = vec![leaf("hidden", "code", 0.0)];
            s
        }]);

        let report = evaluate(&predicted, &expected).unwrap();
        assert_eq!(report.overall.num_samples, 1);
        assert_eq!(report.overall.accuracy, 1.0);
    }

    #[test]
    fn test_partitioning_invariant() {
        let predicted = tree(vec![
            leaf("a", "code", 1.0),
            leaf("b", "writeup", 0.0),
            leaf("c", "results", 1.0),
            leaf("d", "code", 0.0),
        ]);
        let expected = tree(vec![
            leaf("a", "code", 1.0),
            leaf("b", "writeup", 1.0),
            leaf("c", "results", 0.0),
            leaf("d", "code", 0.0),
        ]);

        let report = evaluate(&predicted, &expected).unwrap();
        let stratified_total: usize = report
            .stratified
            .values()
            .map(|m| m.num_samples)
            .sum();
        assert_eq!(stratified_total, report.overall.num_samples);
        let stratified_positives: usize = report
            .stratified
            .values()
            .map(|m| m.num_positives)
            .sum();
        assert_eq!(stratified_positives, report.overall.num_positives);
    }

    #[test]
    fn test_idempotent() {
        let predicted = tree(vec![leaf("a", "code", 1.0), leaf("b", "writeup", 0.0)]);
        let expected = tree(vec![leaf("a", "code", 0.0), leaf("b", "writeup", 0.0)]);

        let first = evaluate(&predicted, &expected).unwrap();
        let second = evaluate(&predicted, &expected).unwrap();
        assert_eq!(first.overall, second.overall);
        assert_eq!(first.stratified, second.stratified);
    }

    #[test]
    fn test_report_json_shape() {
        let predicted = tree(vec![leaf("a", "code", 1.0)]);
        let expected = tree(vec![leaf("a", "code", 1.0)]);

        let report = evaluate(&predicted, &expected).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("accuracy").is_some());
        assert!(json.get("f1").is_some());
        assert!(json.get("stratified").and_then(|s| s.get("code")).is_some());
    }

    #[test]
    fn test_uncategorized_leaf_bucket() {
        let mut plain = leaf("a", "code", 1.0);
        plain.task_category = None;
        let predicted = tree(vec![plain.clone()]);
        let expected = tree(vec![plain]);

        let report = evaluate(&predicted, &expected).unwrap();
        assert!(report.stratified.contains_key("uncategorized"));
    }
}
