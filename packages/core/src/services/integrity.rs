//! Integrity Check - closure table and paths versus parent pointers
//!
//! Recomputes, from `parent_id` alone, the closure edges and materialized
//! path every node should have, and reports every difference with what is
//! actually stored. Used by the `hierarchy-check` binary and by tests after
//! concurrent workloads.

use crate::db::{ClosureIndex, DatabaseError, NodeStore};
use crate::models::{child_path, ClosureEdge, Node, NodeId};
use libsql::Connection;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};

/// A node whose stored path differs from the one derived from its ancestors' names
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathMismatch {
    pub node_id: NodeId,
    pub expected: String,
    pub actual: String,
}

/// Result of [`verify_integrity`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    pub node_count: usize,
    pub edge_count: usize,
    /// Nodes without their `(n, n, 0)` edge
    pub missing_self_edges: Vec<NodeId>,
    /// Non-self edges implied by parent pointers but absent
    pub missing_edges: Vec<ClosureEdge>,
    /// Stored edges not implied by parent pointers (wrong depth included)
    pub unexpected_edges: Vec<ClosureEdge>,
    /// Edges with an endpoint that is not a node
    pub orphan_edges: Vec<ClosureEdge>,
    /// Nodes whose `parent_id` names a missing node
    pub dangling_parents: Vec<NodeId>,
    /// Nodes whose parent chain loops back on itself
    pub cycles: Vec<NodeId>,
    pub path_mismatches: Vec<PathMismatch>,
}

impl IntegrityReport {
    pub fn is_consistent(&self) -> bool {
        self.missing_self_edges.is_empty()
            && self.missing_edges.is_empty()
            && self.unexpected_edges.is_empty()
            && self.orphan_edges.is_empty()
            && self.dangling_parents.is_empty()
            && self.cycles.is_empty()
            && self.path_mismatches.is_empty()
    }

    /// Total number of problems found
    pub fn issue_count(&self) -> usize {
        self.missing_self_edges.len()
            + self.missing_edges.len()
            + self.unexpected_edges.len()
            + self.orphan_edges.len()
            + self.dangling_parents.len()
            + self.cycles.len()
            + self.path_mismatches.len()
    }
}

/// Load both tables on `conn` and compare them
///
/// Run inside a read transaction for a consistent snapshot.
pub async fn verify_integrity(conn: &Connection) -> Result<IntegrityReport, DatabaseError> {
    let nodes = NodeStore::all(conn).await?;
    let edges = ClosureIndex::all_edges(conn).await?;
    Ok(build_report(&nodes, &edges))
}

/// Ancestor chain of a node, nearest first
enum Chain {
    Complete(Vec<NodeId>),
    Dangling,
    Cycle,
}

fn ancestor_chain(node: &Node, by_id: &HashMap<NodeId, &Node>) -> Chain {
    let mut chain = Vec::new();
    let mut seen = HashSet::from([node.id]);
    let mut current = node.parent_id;

    while let Some(parent_id) = current {
        let Some(parent) = by_id.get(&parent_id) else {
            return Chain::Dangling;
        };
        if !seen.insert(parent_id) {
            return Chain::Cycle;
        }
        chain.push(parent_id);
        current = parent.parent_id;
    }
    Chain::Complete(chain)
}

/// Compare stored nodes and edges against what parent pointers imply
pub fn build_report(nodes: &[Node], edges: &[ClosureEdge]) -> IntegrityReport {
    let by_id: HashMap<NodeId, &Node> = nodes.iter().map(|n| (n.id, n)).collect();

    let mut report = IntegrityReport {
        node_count: nodes.len(),
        edge_count: edges.len(),
        ..IntegrityReport::default()
    };

    let mut expected: HashSet<ClosureEdge> = HashSet::new();
    let mut checked: BTreeSet<NodeId> = BTreeSet::new();

    for node in nodes {
        expected.insert(ClosureEdge {
            ancestor_id: node.id,
            descendant_id: node.id,
            depth: 0,
        });

        let chain = match ancestor_chain(node, &by_id) {
            Chain::Complete(chain) => chain,
            Chain::Dangling => {
                if node.parent_id.is_some_and(|p| !by_id.contains_key(&p)) {
                    report.dangling_parents.push(node.id);
                }
                continue;
            }
            Chain::Cycle => {
                report.cycles.push(node.id);
                continue;
            }
        };

        for (i, ancestor_id) in chain.iter().enumerate() {
            expected.insert(ClosureEdge {
                ancestor_id: *ancestor_id,
                descendant_id: node.id,
                depth: i as i64 + 1,
            });
        }

        let mut path: Option<String> = None;
        for ancestor_id in chain.iter().rev() {
            if let Some(ancestor) = by_id.get(ancestor_id) {
                path = Some(child_path(path.as_deref(), &ancestor.name));
            }
        }
        let expected_path = child_path(path.as_deref(), &node.name);
        if expected_path != node.path {
            report.path_mismatches.push(PathMismatch {
                node_id: node.id,
                expected: expected_path,
                actual: node.path.clone(),
            });
        }
        checked.insert(node.id);
    }

    let stored: HashSet<ClosureEdge> = edges.iter().copied().collect();

    for edge in edges {
        if !by_id.contains_key(&edge.ancestor_id) || !by_id.contains_key(&edge.descendant_id) {
            report.orphan_edges.push(*edge);
        } else if !expected.contains(edge) && checked.contains(&edge.descendant_id) {
            report.unexpected_edges.push(*edge);
        }
    }

    for edge in &expected {
        if stored.contains(edge) {
            continue;
        }
        if edge.is_self_edge() {
            report.missing_self_edges.push(edge.descendant_id);
        } else {
            report.missing_edges.push(*edge);
        }
    }

    report.missing_self_edges.sort_unstable();
    report
        .missing_edges
        .sort_unstable_by_key(|e| (e.descendant_id, e.depth, e.ancestor_id));

    if !report.is_consistent() {
        tracing::warn!(
            "Integrity check found {} issues across {} nodes",
            report.issue_count(),
            report.node_count
        );
    }

    report
}
