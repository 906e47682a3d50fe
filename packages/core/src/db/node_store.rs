//! Node Store - canonical node rows and path maintenance
//!
//! SQL for the `nodes` table. Every function takes the connection of an
//! already-open transaction; the hierarchy engine owns the transaction
//! boundaries and is the only caller of the mutating functions.
//!
//! # Paths
//!
//! `path` is derived data (`/Client/Request/Part`). A rename or move rewrites
//! the prefix of every descendant's path in one statement, driven by the
//! closure table:
//!
//! ```sql
//! UPDATE nodes SET path = :new || substr(path, length(:old) + 1)
//! WHERE id IN (SELECT descendant_id FROM node_closure WHERE ancestor_id = :id AND depth > 0)
//! ```
//!
//! # Timestamps
//!
//! `touch_with_ancestors` only ever moves `modified_at` forward
//! (`WHERE modified_at < :when`), so concurrent propagations commute and
//! re-running one is a no-op.

use crate::db::error::DatabaseError;
use crate::models::time::{format_timestamp, parse_timestamp};
use crate::models::{LifecycleStatus, NewNode, Node, NodeId, NodeType};
use chrono::{DateTime, Utc};
use libsql::{Connection, Row, Value};

/// Column list matching [`NodeStore::row_to_node`]
pub(crate) const NODE_COLUMNS: &str =
    "id, node_type, name, path, parent_id, description, data_status, created_at, modified_at";

/// Ids bound per statement, well under SQLite's host parameter limit
pub(crate) const MAX_BOUND_IDS: usize = 500;

/// SQL layer for the `nodes` table
pub struct NodeStore;

impl NodeStore {
    /// Convert a row selected with [`NODE_COLUMNS`] into a `Node`
    pub(crate) fn row_to_node(row: &Row) -> Result<Node, DatabaseError> {
        let id: i64 = row.get(0).map_err(|e| corrupt("id", e))?;
        let node_type: String = row.get(1).map_err(|e| corrupt("node_type", e))?;
        let name: String = row.get(2).map_err(|e| corrupt("name", e))?;
        let path: String = row.get(3).map_err(|e| corrupt("path", e))?;
        let parent_id: Option<i64> = row.get(4).map_err(|e| corrupt("parent_id", e))?;
        let description: Option<String> = row.get(5).map_err(|e| corrupt("description", e))?;
        let status: String = row.get(6).map_err(|e| corrupt("data_status", e))?;
        let created_at: String = row.get(7).map_err(|e| corrupt("created_at", e))?;
        let modified_at: String = row.get(8).map_err(|e| corrupt("modified_at", e))?;

        let node_type: NodeType = node_type.parse().map_err(|e| {
            DatabaseError::corrupt_row(format!("node {}: {}", id, e))
        })?;
        let status: LifecycleStatus = status.parse().map_err(|e| {
            DatabaseError::corrupt_row(format!("node {}: {}", id, e))
        })?;

        Ok(Node {
            id,
            node_type,
            name,
            path,
            parent_id,
            description,
            status,
            created_at: decode_time(id, "created_at", &created_at)?,
            modified_at: decode_time(id, "modified_at", &modified_at)?,
        })
    }

    /// Insert a node row
    ///
    /// `parent_path` is the parent's current path (`None` for a root); the
    /// caller has already checked that the parent exists.
    pub(crate) async fn create(
        conn: &Connection,
        new_node: &NewNode,
        parent_path: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Node, DatabaseError> {
        let path = crate::models::child_path(parent_path, &new_node.name);
        let stamp = format_timestamp(&now);

        conn.execute(
            "INSERT INTO nodes (node_type, name, path, parent_id, description, data_status, created_at, modified_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            (
                new_node.node_type.as_str(),
                new_node.name.as_str(),
                path.as_str(),
                new_node.parent_id,
                new_node.description.as_deref(),
                new_node.status.as_str(),
                stamp.as_str(),
                stamp.as_str(),
            ),
        )
        .await
        .map_err(|e| DatabaseError::from_libsql("Failed to insert node", e))?;

        let id = conn.last_insert_rowid();

        Ok(Node {
            id,
            node_type: new_node.node_type,
            name: new_node.name.clone(),
            path,
            parent_id: new_node.parent_id,
            description: new_node.description.clone(),
            status: new_node.status,
            created_at: now,
            modified_at: now,
        })
    }

    /// Fetch a node by id
    pub async fn get(conn: &Connection, id: NodeId) -> Result<Option<Node>, DatabaseError> {
        let mut rows = conn
            .query(
                &format!("SELECT {} FROM nodes WHERE id = ?", NODE_COLUMNS),
                [id],
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("Failed to execute get_node query", e))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::from_libsql("Failed to read node row", e))?
        {
            Some(row) => Ok(Some(Self::row_to_node(&row)?)),
            None => Ok(None),
        }
    }

    /// Every node of the subtree rooted at `root_id` (`root_id` included),
    /// ordered by path
    ///
    /// Reads through the closure table, so it must run before the subtree is
    /// unlinked.
    pub async fn subtree(conn: &Connection, root_id: NodeId) -> Result<Vec<Node>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM nodes
             WHERE id IN (SELECT descendant_id FROM node_closure WHERE ancestor_id = ?)
             ORDER BY path",
            NODE_COLUMNS
        );
        let rows = conn
            .query(&sql, [root_id])
            .await
            .map_err(|e| DatabaseError::from_libsql("Failed to fetch subtree nodes", e))?;
        collect_nodes(rows).await
    }

    /// Update name and path of `id`, then rewrite the path prefix of every
    /// descendant
    ///
    /// Returns the number of descendant rows rewritten.
    pub(crate) async fn rename(
        conn: &Connection,
        id: NodeId,
        new_name: &str,
        old_path: &str,
        new_path: &str,
    ) -> Result<u64, DatabaseError> {
        conn.execute(
            "UPDATE nodes SET name = ?, path = ? WHERE id = ?",
            (new_name, new_path, id),
        )
        .await
        .map_err(|e| DatabaseError::from_libsql("Failed to rename node", e))?;

        Self::rewrite_descendant_paths(conn, id, old_path, new_path).await
    }

    /// Replace the `old_prefix` of every strict descendant's path
    pub(crate) async fn rewrite_descendant_paths(
        conn: &Connection,
        id: NodeId,
        old_prefix: &str,
        new_prefix: &str,
    ) -> Result<u64, DatabaseError> {
        if old_prefix == new_prefix {
            return Ok(0);
        }
        let old_len = old_prefix.chars().count() as i64;
        conn.execute(
            "UPDATE nodes SET path = ?1 || substr(path, ?2 + 1)
             WHERE id IN (SELECT descendant_id FROM node_closure WHERE ancestor_id = ?3 AND depth > 0)",
            (new_prefix, old_len, id),
        )
        .await
        .map_err(|e| DatabaseError::from_libsql("Failed to rewrite descendant paths", e))
    }

    /// Point `id` at a new parent
    pub(crate) async fn set_parent(
        conn: &Connection,
        id: NodeId,
        parent_id: NodeId,
    ) -> Result<(), DatabaseError> {
        conn.execute(
            "UPDATE nodes SET parent_id = ? WHERE id = ?",
            (parent_id, id),
        )
        .await
        .map_err(|e| DatabaseError::from_libsql("Failed to update parent", e))?;
        Ok(())
    }

    /// Move `modified_at` forward for every node in `ids` and all of their
    /// ancestors, one statement per [`MAX_BOUND_IDS`] ids
    ///
    /// The closure self edge makes each id its own ancestor at depth 0.
    pub(crate) async fn touch_with_ancestors(
        conn: &Connection,
        ids: &[NodeId],
        when: DateTime<Utc>,
    ) -> Result<u64, DatabaseError> {
        let stamp = format_timestamp(&when);
        let mut changed = 0;
        // An ancestor stamped by one chunk is skipped by the next, so the
        // total still counts each row once
        for chunk in ids.chunks(MAX_BOUND_IDS) {
            let sql = format!(
                "UPDATE nodes SET modified_at = ?1
                 WHERE modified_at < ?1
                   AND id IN (SELECT ancestor_id FROM node_closure WHERE descendant_id IN ({}))",
                numbered_placeholders(2, chunk.len())
            );
            let mut params = Vec::with_capacity(chunk.len() + 1);
            params.push(Value::Text(stamp.clone()));
            params.extend(chunk.iter().map(|id| Value::Integer(*id)));

            changed += conn
                .execute(&sql, params)
                .await
                .map_err(|e| DatabaseError::from_libsql("Failed to propagate modified_at", e))?;
        }
        Ok(changed)
    }

    /// Set the lifecycle marker and touch the node itself
    pub(crate) async fn set_status(
        conn: &Connection,
        id: NodeId,
        status: LifecycleStatus,
        when: DateTime<Utc>,
    ) -> Result<u64, DatabaseError> {
        let stamp = format_timestamp(&when);
        conn.execute(
            "UPDATE nodes SET data_status = ?1,
                 modified_at = CASE WHEN modified_at < ?2 THEN ?2 ELSE modified_at END
             WHERE id = ?3",
            (status.as_str(), stamp.as_str(), id),
        )
        .await
        .map_err(|e| DatabaseError::from_libsql("Failed to update status", e))
    }

    /// Physically delete one node row
    ///
    /// Fails with [`DatabaseError::ForeignKeyViolation`] while any child,
    /// closure edge or payload row still references it.
    pub(crate) async fn delete_row(conn: &Connection, id: NodeId) -> Result<u64, DatabaseError> {
        conn.execute("DELETE FROM nodes WHERE id = ?", [id])
            .await
            .map_err(|e| DatabaseError::from_libsql(&format!("Failed to delete node {}", id), e))
    }

    /// Direct children of `parent` (roots when `None`), most recently
    /// modified first
    pub async fn children(
        conn: &Connection,
        parent: Option<NodeId>,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Node>, DatabaseError> {
        let limit = limit.min(i64::MAX as u64) as i64;
        let offset = offset.min(i64::MAX as u64) as i64;
        let rows = match parent {
            Some(parent_id) => conn
                .query(
                    &format!(
                        "SELECT {} FROM nodes WHERE parent_id = ?
                         ORDER BY modified_at DESC, id DESC LIMIT ? OFFSET ?",
                        NODE_COLUMNS
                    ),
                    (parent_id, limit, offset),
                )
                .await,
            None => conn
                .query(
                    &format!(
                        "SELECT {} FROM nodes WHERE parent_id IS NULL
                         ORDER BY modified_at DESC, id DESC LIMIT ? OFFSET ?",
                        NODE_COLUMNS
                    ),
                    (limit, offset),
                )
                .await,
        }
        .map_err(|e| DatabaseError::from_libsql("Failed to list children", e))?;

        collect_nodes(rows).await
    }

    /// Number of direct children of `parent` (roots when `None`)
    pub async fn count_children(
        conn: &Connection,
        parent: Option<NodeId>,
    ) -> Result<u64, DatabaseError> {
        let rows = match parent {
            Some(parent_id) => {
                conn.query("SELECT COUNT(*) FROM nodes WHERE parent_id = ?", [parent_id])
                    .await
            }
            None => {
                conn.query("SELECT COUNT(*) FROM nodes WHERE parent_id IS NULL", ())
                    .await
            }
        }
        .map_err(|e| DatabaseError::from_libsql("Failed to count children", e))?;

        single_count(rows).await
    }

    /// Root nodes of one type, most recently modified first
    pub async fn roots_of_type(
        conn: &Connection,
        node_type: NodeType,
    ) -> Result<Vec<Node>, DatabaseError> {
        let rows = conn
            .query(
                &format!(
                    "SELECT {} FROM nodes WHERE parent_id IS NULL AND node_type = ?
                     ORDER BY modified_at DESC, id DESC",
                    NODE_COLUMNS
                ),
                [node_type.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("Failed to list roots", e))?;
        collect_nodes(rows).await
    }

    /// Strict descendants of `ancestor` with the given type, optionally
    /// bounded by closure depth, most recently modified first
    pub async fn descendants_of_type(
        conn: &Connection,
        ancestor: NodeId,
        node_type: NodeType,
        max_depth: Option<i64>,
    ) -> Result<Vec<Node>, DatabaseError> {
        let rows = conn
            .query(
                &format!(
                    "SELECT {} FROM node_closure c JOIN nodes n ON n.id = c.descendant_id
                     WHERE c.ancestor_id = ?1 AND c.depth > 0 AND n.node_type = ?2
                       AND (?3 IS NULL OR c.depth <= ?3)
                     ORDER BY n.modified_at DESC, n.id DESC",
                    NODE_COLUMNS
                ),
                (ancestor, node_type.as_str(), max_depth),
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("Failed to query descendants by type", e))?;
        collect_nodes(rows).await
    }

    /// Names of the direct children of `parent` (roots when `None`)
    pub async fn child_names(
        conn: &Connection,
        parent: Option<NodeId>,
    ) -> Result<Vec<String>, DatabaseError> {
        let mut rows = match parent {
            Some(parent_id) => {
                conn.query("SELECT name FROM nodes WHERE parent_id = ?", [parent_id])
                    .await
            }
            None => {
                conn.query("SELECT name FROM nodes WHERE parent_id IS NULL", ())
                    .await
            }
        }
        .map_err(|e| DatabaseError::from_libsql("Failed to list child names", e))?;

        let mut names = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::from_libsql("Failed to read child name", e))?
        {
            names.push(row.get::<String>(0).map_err(|e| corrupt("name", e))?);
        }
        Ok(names)
    }

    /// Every node, ordered by id
    pub async fn all(conn: &Connection) -> Result<Vec<Node>, DatabaseError> {
        let rows = conn
            .query(
                &format!("SELECT {} FROM nodes ORDER BY id", NODE_COLUMNS),
                (),
            )
            .await
            .map_err(|e| DatabaseError::from_libsql("Failed to list nodes", e))?;
        collect_nodes(rows).await
    }
}

/// `?start, ?start+1, …` for `n` numbered parameters
pub(crate) fn numbered_placeholders(start: usize, n: usize) -> String {
    (start..start + n)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) async fn collect_nodes(mut rows: libsql::Rows) -> Result<Vec<Node>, DatabaseError> {
    let mut nodes = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::from_libsql("Failed to read node row", e))?
    {
        nodes.push(NodeStore::row_to_node(&row)?);
    }
    Ok(nodes)
}

pub(crate) async fn single_count(mut rows: libsql::Rows) -> Result<u64, DatabaseError> {
    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::from_libsql("Failed to read count", e))?
        .ok_or_else(|| DatabaseError::sql_execution("COUNT query returned no rows"))?;
    let count: i64 = row.get(0).map_err(|e| corrupt("count", e))?;
    Ok(count.max(0) as u64)
}

fn corrupt(column: &str, err: libsql::Error) -> DatabaseError {
    DatabaseError::corrupt_row(format!("Failed to get {}: {}", column, err))
}

fn decode_time(id: NodeId, column: &str, raw: &str) -> Result<DateTime<Utc>, DatabaseError> {
    parse_timestamp(raw).ok_or_else(|| {
        DatabaseError::corrupt_row(format!(
            "node {}: unable to parse {} '{}'",
            id, column, raw
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbered_placeholders() {
        assert_eq!(numbered_placeholders(2, 3), "?2, ?3, ?4");
        assert_eq!(numbered_placeholders(1, 0), "");
    }
}
