//! Closure Index - transitive closure of the parent-pointer forest
//!
//! `node_closure` holds one `(ancestor_id, descendant_id, depth)` row for
//! every ordered pair of connected nodes, plus a depth-0 self edge per node.
//! It is the only source of truth for "is X above Y" and for subtree
//! enumeration; no query walks `parent_id` recursively.
//!
//! # Invariants
//!
//! - exactly one `(n, n, 0)` edge per node
//! - for a node `n` with parent `p`, edges into `n` are exactly
//!   `{(a, n, d + 1) | (a, p, d)} ∪ {(n, n, 0)}`
//!
//! Like [`NodeStore`](super::NodeStore), every function runs on the
//! connection of a transaction opened by the hierarchy engine.

use crate::db::error::DatabaseError;
use crate::models::{AncestorEntry, ClosureEdge, NodeId, NodeType};
use libsql::Connection;
use std::collections::BTreeSet;

/// SQL layer for the `node_closure` table
pub struct ClosureIndex;

impl ClosureIndex {
    /// Create the self edge of `node_id` and, under a parent, one edge from
    /// each of the parent's ancestors (the parent's own self edge yields the
    /// direct `(parent, node, 1)` edge)
    ///
    /// Returns the number of ancestor edges created. Under a parent this is
    /// at least 1; 0 means the parent has no closure rows, which callers
    /// treat as a missing parent.
    pub(crate) async fn link_new_node(
        conn: &Connection,
        node_id: NodeId,
        parent_id: Option<NodeId>,
    ) -> Result<u64, DatabaseError> {
        conn.execute(
            "INSERT INTO node_closure (ancestor_id, descendant_id, depth) VALUES (?1, ?1, 0)",
            [node_id],
        )
        .await
        .map_err(|e| DatabaseError::from_libsql("Failed to insert self edge", e))?;

        let Some(parent_id) = parent_id else {
            return Ok(0);
        };

        conn.execute(
            "INSERT INTO node_closure (ancestor_id, descendant_id, depth)
             SELECT ancestor_id, ?1, depth + 1 FROM node_closure WHERE descendant_id = ?2",
            (node_id, parent_id),
        )
        .await
        .map_err(|e| DatabaseError::from_libsql("Failed to link node to ancestors", e))
    }

    /// Ancestors of `node_id` with `depth >= min_depth`, nearest first
    ///
    /// Each entry carries the ancestor's type so callers can pick "the
    /// nearest ancestor of type T" by taking the first match.
    pub async fn ancestors_of(
        conn: &Connection,
        node_id: NodeId,
        min_depth: i64,
    ) -> Result<Vec<AncestorEntry>, DatabaseError> {
        let mut rows = conn
            .query(
                "SELECT c.ancestor_id, c.depth, n.node_type
                 FROM node_closure c JOIN nodes n ON n.id = c.ancestor_id
                 WHERE c.descendant_id = ? AND c.depth >= ?
                 ORDER BY c.depth ASC",
                (node_id, min_depth),
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("Failed to query ancestors", e))?;

        let mut ancestors = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::from_libsql("Failed to read ancestor row", e))?
        {
            let id: i64 = row.get(0).map_err(DatabaseError::LibsqlError)?;
            let depth: i64 = row.get(1).map_err(DatabaseError::LibsqlError)?;
            let node_type: String = row.get(2).map_err(DatabaseError::LibsqlError)?;
            let node_type: NodeType = node_type.parse().map_err(|e| {
                DatabaseError::corrupt_row(format!("node {}: {}", id, e))
            })?;
            ancestors.push(AncestorEntry {
                id,
                depth,
                node_type,
            });
        }
        Ok(ancestors)
    }

    /// Descendants of `node_id` with `depth >= min_depth`
    pub async fn descendants_of(
        conn: &Connection,
        node_id: NodeId,
        min_depth: i64,
    ) -> Result<BTreeSet<NodeId>, DatabaseError> {
        let pairs = Self::descendants_with_depth(conn, node_id, min_depth).await?;
        Ok(pairs.into_iter().map(|(id, _)| id).collect())
    }

    /// `(descendant, depth)` pairs under `node_id`, deepest first
    pub async fn descendants_with_depth(
        conn: &Connection,
        node_id: NodeId,
        min_depth: i64,
    ) -> Result<Vec<(NodeId, i64)>, DatabaseError> {
        let mut rows = conn
            .query(
                "SELECT descendant_id, depth FROM node_closure
                 WHERE ancestor_id = ? AND depth >= ?
                 ORDER BY depth DESC, descendant_id DESC",
                (node_id, min_depth),
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("Failed to query descendants", e))?;

        let mut pairs = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::from_libsql("Failed to read descendant row", e))?
        {
            let id: i64 = row.get(0).map_err(DatabaseError::LibsqlError)?;
            let depth: i64 = row.get(1).map_err(DatabaseError::LibsqlError)?;
            pairs.push((id, depth));
        }
        Ok(pairs)
    }

    /// Whether `ancestor_id` is `descendant_id` or one of its ancestors
    pub async fn is_ancestor_or_self(
        conn: &Connection,
        ancestor_id: NodeId,
        descendant_id: NodeId,
    ) -> Result<bool, DatabaseError> {
        let mut rows = conn
            .query(
                "SELECT 1 FROM node_closure WHERE ancestor_id = ? AND descendant_id = ?",
                (ancestor_id, descendant_id),
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("Failed to query closure edge", e))?;

        Ok(rows
            .next()
            .await
            .map_err(|e| DatabaseError::from_libsql("Failed to read closure edge", e))?
            .is_some())
    }

    /// Remove every edge touching the subtree rooted at `node_id`
    ///
    /// Returns the subtree (`node_id` included) ordered deepest first, which
    /// is a safe order for deleting the node rows afterwards. Empty if
    /// `node_id` has no self edge.
    pub(crate) async fn unlink_subtree(
        conn: &Connection,
        node_id: NodeId,
    ) -> Result<Vec<NodeId>, DatabaseError> {
        let subtree: Vec<NodeId> = Self::descendants_with_depth(conn, node_id, 0)
            .await?
            .into_iter()
            .map(|(id, _)| id)
            .collect();

        if subtree.is_empty() {
            return Ok(subtree);
        }

        // Subtree ids stay in SQL; a bound list hits SQLite's variable limit
        let removed = conn
            .execute(
                "DELETE FROM node_closure
                 WHERE descendant_id IN (SELECT descendant_id FROM node_closure WHERE ancestor_id = ?1)
                    OR ancestor_id IN (SELECT descendant_id FROM node_closure WHERE ancestor_id = ?1)",
                [node_id],
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("Failed to unlink subtree", e))?;

        tracing::debug!(
            "Unlinked subtree of node {}: {} nodes, {} closure edges",
            node_id,
            subtree.len(),
            removed
        );

        Ok(subtree)
    }

    /// Re-attach the subtree rooted at `node_id` under `new_parent_id`
    ///
    /// Drops the edges from former ancestors (those outside the subtree) into
    /// the subtree, then adds the cross product of the new parent's ancestors
    /// with the subtree's internal edges. Edges inside the subtree are kept.
    /// The caller guarantees `new_parent_id` is not inside the subtree.
    pub(crate) async fn relink_subtree(
        conn: &Connection,
        node_id: NodeId,
        new_parent_id: NodeId,
    ) -> Result<(u64, u64), DatabaseError> {
        let dropped = conn
            .execute(
                "DELETE FROM node_closure
                 WHERE descendant_id IN (SELECT descendant_id FROM node_closure WHERE ancestor_id = ?1)
                   AND ancestor_id NOT IN (SELECT descendant_id FROM node_closure WHERE ancestor_id = ?1)",
                [node_id],
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("Failed to detach subtree", e))?;

        let added = conn
            .execute(
                "INSERT INTO node_closure (ancestor_id, descendant_id, depth)
                 SELECT above.ancestor_id, below.descendant_id, above.depth + below.depth + 1
                 FROM node_closure AS above, node_closure AS below
                 WHERE above.descendant_id = ?1 AND below.ancestor_id = ?2",
                (new_parent_id, node_id),
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("Failed to attach subtree", e))?;

        Ok((dropped, added))
    }

    /// Every edge, ordered by `(ancestor_id, descendant_id)`
    pub async fn all_edges(conn: &Connection) -> Result<Vec<ClosureEdge>, DatabaseError> {
        let mut rows = conn
            .query(
                "SELECT ancestor_id, descendant_id, depth FROM node_closure
                 ORDER BY ancestor_id, descendant_id",
                (),
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("Failed to list closure edges", e))?;

        let mut edges = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::from_libsql("Failed to read closure edge", e))?
        {
            edges.push(ClosureEdge {
                ancestor_id: row.get(0).map_err(DatabaseError::LibsqlError)?,
                descendant_id: row.get(1).map_err(DatabaseError::LibsqlError)?,
                depth: row.get(2).map_err(DatabaseError::LibsqlError)?,
            });
        }
        Ok(edges)
    }
}
