//! Structural metrics and constraints for term trees.
//!
//! Measures a term tree's shape (node and leaf counts, depth, fanout,
//! scale span) and checks it against declarative bounds, reporting
//! human-readable violations. Programs attach constraints to keep root
//! terms inside a complexity envelope before any rewriting begins.

use crate::term::Term;
use serde::{Deserialize, Serialize};

/// Aggregate measurements of a term tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuralMetrics {
    /// Total nodes, the root included.
    pub nodes: usize,
    /// Nodes without children.
    pub leaves: usize,
    /// Longest root-to-leaf path, counting the root as depth 1.
    pub max_depth: usize,
    /// Largest child count of any node.
    pub max_fanout: usize,
    /// Smallest scale in the tree.
    pub min_scale: u32,
    /// Largest scale in the tree.
    pub max_scale: u32,
}

/// Declarative bounds on a well-formed term tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StructuralConstraints {
    /// Cap on total nodes.
    #[serde(default)]
    pub max_nodes: Option<usize>,
    /// Cap on tree depth.
    #[serde(default)]
    pub max_depth: Option<usize>,
    /// Cap on any node's child count.
    #[serde(default)]
    pub max_fanout: Option<usize>,
    /// Lowest admissible scale.
    #[serde(default)]
    pub min_scale: Option<u32>,
    /// Highest admissible scale.
    #[serde(default)]
    pub max_scale: Option<u32>,
}

/// Computes size, depth, fanout, and scale metrics for a term tree.
pub fn measure_structure(root: &Term) -> StructuralMetrics {
    let mut metrics = StructuralMetrics {
        nodes: 0,
        leaves: 0,
        max_depth: 0,
        max_fanout: 0,
        min_scale: root.scale,
        max_scale: root.scale,
    };

    let mut stack: Vec<(&Term, usize)> = vec![(root, 1)];
    while let Some((term, depth)) = stack.pop() {
        metrics.nodes += 1;
        if term.children.is_empty() {
            metrics.leaves += 1;
        }
        metrics.max_depth = metrics.max_depth.max(depth);
        metrics.max_fanout = metrics.max_fanout.max(term.children.len());
        metrics.min_scale = metrics.min_scale.min(term.scale);
        metrics.max_scale = metrics.max_scale.max(term.scale);
        for child in term.children.iter().rev() {
            stack.push((child, depth + 1));
        }
    }
    metrics
}

/// Returns human-readable violations of the given constraints.
///
/// An empty vector means the tree conforms.
pub fn validate_structure(root: &Term, constraints: &StructuralConstraints) -> Vec<String> {
    let metrics = measure_structure(root);
    let mut violations = Vec::new();

    if let Some(max_nodes) = constraints.max_nodes {
        if metrics.nodes > max_nodes {
            violations.push(format!("nodes={} exceeds max_nodes={}", metrics.nodes, max_nodes));
        }
    }
    if let Some(max_depth) = constraints.max_depth {
        if metrics.max_depth > max_depth {
            violations
                .push(format!("max_depth={} exceeds max_depth={}", metrics.max_depth, max_depth));
        }
    }
    if let Some(max_fanout) = constraints.max_fanout {
        if metrics.max_fanout > max_fanout {
            violations.push(format!(
                "max_fanout={} exceeds max_fanout={}",
                metrics.max_fanout, max_fanout
            ));
        }
    }
    if let Some(min_scale) = constraints.min_scale {
        if metrics.min_scale < min_scale {
            violations
                .push(format!("min_scale={} below min_scale={}", metrics.min_scale, min_scale));
        }
    }
    if let Some(max_scale) = constraints.max_scale {
        if metrics.max_scale > max_scale {
            violations
                .push(format!("max_scale={} exceeds max_scale={}", metrics.max_scale, max_scale));
        }
    }
    violations
}
