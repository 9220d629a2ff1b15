//! Rubric tree data model.
//!
//! A rubric decomposes a grading task into a rooted hierarchy of criteria.
//! Only leaves carry directly-assigned scores; inner nodes aggregate their
//! children. Nodes are arena-stored and addressed by [`NodeHandle`], with a
//! separately maintained `id -> handle` map so correlating nodes across two
//! independently built trees is O(1) per lookup.

mod tree;

pub use tree::{NodeHandle, RubricSpec, TaskNode, TaskTree};
