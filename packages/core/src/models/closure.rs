//! Closure Index Records
//!
//! Rows of the `node_closure` table: one `(ancestor, descendant, depth)` fact
//! per ordered pair connected in the tree, including a depth-0 self edge for
//! every node.

use super::node::{NodeId, NodeType};
use serde::{Deserialize, Serialize};

/// Materialized ancestor/descendant fact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosureEdge {
    pub ancestor_id: NodeId,
    pub descendant_id: NodeId,
    /// 0 iff `ancestor_id == descendant_id`
    pub depth: i64,
}

impl ClosureEdge {
    pub fn is_self_edge(&self) -> bool {
        self.depth == 0
    }
}

/// Ancestor as returned by ancestor queries, nearest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AncestorEntry {
    pub id: NodeId,
    pub depth: i64,
    pub node_type: NodeType,
}
