//! Arena-backed task tree with stable string ids.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::RubricError;

/// Serialized (nested) form of a rubric tree.
///
/// This is the on-disk JSON shape: each node inlines its children. Graded
/// trees round-trip through the same shape with `score` populated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RubricSpec {
    /// Stable identifier, unique within one tree.
    pub id: String,
    /// Category label for stratified reporting; only meaningful at leaves.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_category: Option<String>,
    /// What the judge should check at this node.
    #[serde(default)]
    pub requirements: String,
    /// Child criteria; empty for leaves.
    #[serde(default)]
    pub sub_tasks: Vec<RubricSpec>,
    /// Assigned score, if graded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// Whether this node and its subtree participate in metric computation.
    #[serde(default = "default_valid")]
    pub valid_score: bool,
}

fn default_valid() -> bool {
    true
}

/// Arena index of a node within one [`TaskTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle(usize);

/// A single rubric node.
#[derive(Debug, Clone)]
pub struct TaskNode {
    /// Stable identifier, unique within the tree.
    pub id: String,
    /// Category label; only meaningful at leaves.
    pub task_category: Option<String>,
    /// What the judge should check at this node.
    pub requirements: String,
    /// Whether this node and its subtree participate in metrics.
    pub valid_score: bool,
    sub_tasks: Vec<NodeHandle>,
    parent: Option<NodeHandle>,
    score: Option<f64>,
}

impl TaskNode {
    /// A node is a leaf iff it has no children.
    pub fn is_leaf(&self) -> bool {
        self.sub_tasks.is_empty()
    }

    /// Assigned score, if any.
    pub fn score(&self) -> Option<f64> {
        self.score
    }

    /// Child handles, in rubric order.
    pub fn sub_tasks(&self) -> &[NodeHandle] {
        &self.sub_tasks
    }

    /// Parent handle; `None` at the root.
    pub fn parent(&self) -> Option<NodeHandle> {
        self.parent
    }
}

/// A rubric tree: arena of nodes plus an `id -> handle` index.
#[derive(Debug, Clone)]
pub struct TaskTree {
    nodes: Vec<TaskNode>,
    index: HashMap<String, NodeHandle>,
    root: NodeHandle,
}

impl TaskTree {
    /// Build a tree from its serialized form.
    ///
    /// Fails with [`RubricError::DuplicateId`] if two nodes share an id.
    pub fn from_spec(spec: &RubricSpec) -> Result<Self, RubricError> {
        let mut tree = Self {
            nodes: Vec::new(),
            index: HashMap::new(),
            root: NodeHandle(0),
        };
        let root = tree.add_subtree(spec, None)?;
        tree.root = root;
        Ok(tree)
    }

    /// Parse a tree from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self, RubricError> {
        let spec: RubricSpec = serde_json::from_str(json)?;
        Self::from_spec(&spec)
    }

    /// Load a tree from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, RubricError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    fn add_subtree(
        &mut self,
        spec: &RubricSpec,
        parent: Option<NodeHandle>,
    ) -> Result<NodeHandle, RubricError> {
        if self.index.contains_key(&spec.id) {
            return Err(RubricError::DuplicateId(spec.id.clone()));
        }
        let handle = NodeHandle(self.nodes.len());
        self.nodes.push(TaskNode {
            id: spec.id.clone(),
            task_category: spec.task_category.clone(),
            requirements: spec.requirements.clone(),
            valid_score: spec.valid_score,
            sub_tasks: Vec::new(),
            parent,
            score: spec.score,
        });
        self.index.insert(spec.id.clone(), handle);

        let mut children = Vec::with_capacity(spec.sub_tasks.len());
        for child in &spec.sub_tasks {
            children.push(self.add_subtree(child, Some(handle))?);
        }
        self.nodes[handle.0].sub_tasks = children;
        Ok(handle)
    }

    /// Serialize back to the nested form.
    pub fn to_spec(&self) -> RubricSpec {
        self.spec_for(self.root)
    }

    fn spec_for(&self, handle: NodeHandle) -> RubricSpec {
        let node = self.node(handle);
        RubricSpec {
            id: node.id.clone(),
            task_category: node.task_category.clone(),
            requirements: node.requirements.clone(),
            sub_tasks: node.sub_tasks.iter().map(|&c| self.spec_for(c)).collect(),
            score: node.score,
            valid_score: node.valid_score,
        }
    }

    /// Root handle.
    pub fn root(&self) -> NodeHandle {
        self.root
    }

    /// Borrow a node.
    pub fn node(&self, handle: NodeHandle) -> &TaskNode {
        &self.nodes[handle.0]
    }

    /// O(1) id lookup.
    pub fn find(&self, id: &str) -> Option<NodeHandle> {
        self.index.get(id).copied()
    }

    /// Number of nodes in the tree.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Assign a score to a node. Each node is scored at most once.
    pub fn set_score(&mut self, handle: NodeHandle, score: f64) -> Result<(), RubricError> {
        let node = &mut self.nodes[handle.0];
        if node.score.is_some() {
            return Err(RubricError::ScoreAlreadySet(node.id.clone()));
        }
        node.score = Some(score);
        Ok(())
    }

    /// Leaves reachable without crossing a `valid_score = false` node,
    /// depth-first in rubric order.
    pub fn valid_leaves(&self) -> Vec<NodeHandle> {
        let mut leaves = Vec::new();
        self.collect_valid_leaves(self.root, &mut leaves);
        leaves
    }

    fn collect_valid_leaves(&self, handle: NodeHandle, leaves: &mut Vec<NodeHandle>) {
        let node = self.node(handle);
        if !node.valid_score {
            return;
        }
        if node.is_leaf() {
            leaves.push(handle);
            return;
        }
        for &child in &node.sub_tasks {
            self.collect_valid_leaves(child, leaves);
        }
    }

    /// Handles from the root down to (excluding) the given node.
    pub fn ancestors(&self, handle: NodeHandle) -> Vec<NodeHandle> {
        let mut chain = Vec::new();
        let mut current = self.node(handle).parent;
        while let Some(parent) = current {
            chain.push(parent);
            current = self.node(parent).parent;
        }
        chain.reverse();
        chain
    }

    /// Siblings that precede the given node in rubric order.
    pub fn prior_siblings(&self, handle: NodeHandle) -> Vec<NodeHandle> {
        match self.node(handle).parent {
            Some(parent) => self
                .node(parent)
                .sub_tasks
                .iter()
                .copied()
                .take_while(|&sibling| sibling != handle)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Assign every ungraded inner node the mean of its children's scores.
    ///
    /// Children without a score or with `valid_score = false` are ignored;
    /// an inner node whose children are all unscored stays unscored.
    pub fn rollup_mean(&mut self) {
        self.rollup_node(self.root);
    }

    fn rollup_node(&mut self, handle: NodeHandle) -> Option<f64> {
        let children = self.node(handle).sub_tasks.clone();
        if children.is_empty() {
            return self.node(handle).score;
        }
        let mut scores = Vec::new();
        for child in children {
            let score = self.rollup_node(child);
            if self.node(child).valid_score {
                if let Some(s) = score {
                    scores.push(s);
                }
            }
        }
        if !scores.is_empty() && self.node(handle).score.is_none() {
            let mean = scores.iter().sum::<f64>() / scores.len() as f64;
            self.nodes[handle.0].score = Some(mean);
        }
        self.node(handle).score
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(id: &str, category: &str, score: Option<f64>) -> RubricSpec {
        RubricSpec {
            id: id.to_string(),
            task_category: Some(category.to_string()),
            requirements: format!("check {id}"),
            sub_tasks: Vec::new(),
            score,
            valid_score: true,
        }
    }

    fn branch(id: &str, children: Vec<RubricSpec>) -> RubricSpec {
        RubricSpec {
            id: id.to_string(),
            task_category: None,
            requirements: String::new(),
            sub_tasks: children,
            score: None,
            valid_score: true,
        }
    }

    #[test]
    fn test_build_and_find() {
        let spec = branch("root", vec![leaf("a", "code", None), leaf("b", "writeup", None)]);
        let tree = TaskTree::from_spec(&spec).unwrap();

        assert_eq!(tree.len(), 3);
        let a = tree.find("a").unwrap();
        assert!(tree.node(a).is_leaf());
        assert_eq!(tree.node(a).task_category.as_deref(), Some("code"));
        assert!(tree.find("missing").is_none());
        assert!(!tree.node(tree.root()).is_leaf());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let spec = branch("root", vec![leaf("a", "code", None), leaf("a", "code", None)]);
        let err = TaskTree::from_spec(&spec).unwrap_err();
        assert!(matches!(err, RubricError::DuplicateId(id) if id == "a"));
    }

    #[test]
    fn test_score_set_once() {
        let spec = branch("root", vec![leaf("a", "code", None)]);
        let mut tree = TaskTree::from_spec(&spec).unwrap();
        let a = tree.find("a").unwrap();

        tree.set_score(a, 1.0).unwrap();
        assert_eq!(tree.node(a).score(), Some(1.0));

        let err = tree.set_score(a, 0.0).unwrap_err();
        assert!(matches!(err, RubricError::ScoreAlreadySet(_)));
    }

    #[test]
    fn test_valid_leaves_skip_invalid_subtree() {
        let mut invalid = branch("skip", vec![leaf("hidden", "code", None)]);
        invalid.valid_score = false;
        let spec = branch("root", vec![leaf("a", "code", None), invalid, leaf("b", "code", None)]);
        let tree = TaskTree::from_spec(&spec).unwrap();

        let ids: Vec<&str> = tree
            .valid_leaves()
            .into_iter()
            .map(|h| tree.node(h).id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_ancestors_and_prior_siblings() {
        let spec = branch(
            "root",
            vec![branch("mid", vec![leaf("a", "code", None), leaf("b", "code", None), leaf("c", "code", None)])],
        );
        let tree = TaskTree::from_spec(&spec).unwrap();
        let c = tree.find("c").unwrap();

        let ancestor_ids: Vec<&str> = tree
            .ancestors(c)
            .into_iter()
            .map(|h| tree.node(h).id.as_str())
            .collect();
        assert_eq!(ancestor_ids, vec!["root", "mid"]);

        let sibling_ids: Vec<&str> = tree
            .prior_siblings(c)
            .into_iter()
            .map(|h| tree.node(h).id.as_str())
            .collect();
        assert_eq!(sibling_ids, vec!["a", "b"]);
    }

    #[test]
    fn test_rollup_mean() {
        let spec = branch(
            "root",
            vec![
                branch("mid", vec![leaf("a", "code", Some(1.0)), leaf("b", "code", Some(0.0))]),
                leaf("c", "writeup", Some(1.0)),
            ],
        );
        let mut tree = TaskTree::from_spec(&spec).unwrap();
        tree.rollup_mean();

        let mid = tree.find("mid").unwrap();
        assert_eq!(tree.node(mid).score(), Some(0.5));
        let root = tree.root();
        assert_eq!(tree.node(root).score(), Some(0.75));
    }

    #[test]
    fn test_rollup_ignores_invalid_children() {
        let mut bad = leaf("bad", "code", Some(0.0));
        bad.valid_score = false;
        let spec = branch("root", vec![leaf("a", "code", Some(1.0)), bad]);
        let mut tree = TaskTree::from_spec(&spec).unwrap();
        tree.rollup_mean();

        assert_eq!(tree.node(tree.root()).score(), Some(1.0));
    }

    #[test]
    fn test_spec_round_trip() {
        let spec = branch("root", vec![leaf("a", "code", Some(1.0)), leaf("b", "writeup", None)]);
        let tree = TaskTree::from_spec(&spec).unwrap();
        let round = tree.to_spec();

        let json_in = serde_json::to_string(&spec).unwrap();
        let json_out = serde_json::to_string(&round).unwrap();
        assert_eq!(json_in, json_out);
    }

    #[test]
    fn test_json_defaults() {
        let tree = TaskTree::from_json_str(r#"{"id": "root", "sub_tasks": [{"id": "a"}]}"#).unwrap();
        let a = tree.find("a").unwrap();
        assert!(tree.node(a).valid_score);
        assert!(tree.node(a).score().is_none());
    }
}
