//! Hierarchy Engine - transactional operations on the business tree
//!
//! This module owns every mutation of the `nodes` and `node_closure` tables:
//!
//! - Insert a node under an optional parent, with its domain payload
//! - Rename and/or move a node, rewriting descendant paths
//! - Delete a whole subtree, running payload cleanup for each removed node
//! - Propagate `modified_at` up the ancestor chain
//!
//! # Transactions
//!
//! Every mutation runs in one `BEGIN IMMEDIATE` transaction on its own
//! connection: the node rows, the closure edges, the payload callbacks and
//! the timestamp propagation commit or roll back together. Two concurrent
//! writers serialize on the database write lock (bounded by the busy
//! timeout); a writer that cannot get the lock fails with
//! [`HierarchyError::ConcurrentModification`] and applies nothing.
//!
//! The clock is read after the lock is held, so timestamps stamped by
//! successive writers never go backwards.
//!
//! # Examples
//!
//! ```rust,no_run
//! use synergia_core::config::HierarchyConfig;
//! use synergia_core::models::{NewNode, NodeType};
//! use synergia_core::services::{HierarchyEngine, NoPayload};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = HierarchyEngine::open(HierarchyConfig::from_env()).await?;
//!
//!     let client = engine
//!         .insert_node(NewNode::root(NodeType::Client, "ACME"), &NoPayload)
//!         .await?;
//!     let request = engine
//!         .insert_node(NewNode::child(NodeType::TrialRequest, "ORD1", client.id), &NoPayload)
//!         .await?;
//!
//!     assert_eq!(request.path, "/ACME/ORD1");
//!     Ok(())
//! }
//! ```

use crate::config::HierarchyConfig;
use crate::db::{ClosureIndex, DatabaseError, DatabaseService, NodeStore};
use crate::models::time::{SystemTimeProvider, TimeProvider};
use crate::models::{
    child_path, validate_name, AncestorEntry, ChildPage, LifecycleStatus, NewNode, Node, NodeId,
    NodeType,
};
use crate::services::error::HierarchyError;
use crate::services::integrity::{verify_integrity, IntegrityReport};
use crate::services::payload::{PayloadBuilder, PayloadCleanup, PayloadRegistry, PayloadUpdater};
use chrono::{DateTime, SubsecRound, Utc};
use libsql::Connection;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Transactional hierarchy operations over a shared database
///
/// Cheap to clone; clones share the database handle, clock and cleanup
/// registrations as they were at clone time.
#[derive(Clone)]
pub struct HierarchyEngine {
    db: Arc<DatabaseService>,

    config: HierarchyConfig,

    /// Clock stamped on every mutation
    clock: Arc<dyn TimeProvider>,

    /// Cleanup run by [`delete_subtree`](Self::delete_subtree) per node type
    payloads: PayloadRegistry,
}

impl HierarchyEngine {
    /// Create an engine over an already opened database
    pub fn new(db: Arc<DatabaseService>, config: HierarchyConfig) -> Self {
        Self {
            db,
            config,
            clock: Arc::new(SystemTimeProvider),
            payloads: PayloadRegistry::new(),
        }
    }

    /// Open the database described by `config` and create an engine over it
    pub async fn open(config: HierarchyConfig) -> Result<Self, HierarchyError> {
        let db = DatabaseService::open(&config).await?;
        Ok(Self::new(Arc::new(db), config))
    }

    /// Replace the clock (tests, imports that preserve original dates)
    pub fn with_clock(mut self, clock: Arc<dyn TimeProvider>) -> Self {
        self.clock = clock;
        self
    }

    /// Register the payload cleanup for one node type
    pub fn register_cleanup(&mut self, node_type: NodeType, cleanup: Arc<dyn PayloadCleanup>) {
        self.payloads.register(node_type, cleanup);
    }

    pub fn database(&self) -> &Arc<DatabaseService> {
        &self.db
    }

    pub fn config(&self) -> &HierarchyConfig {
        &self.config
    }

    //
    // TRANSACTION PLUMBING
    //

    async fn begin_write(&self) -> Result<Connection, HierarchyError> {
        let conn = self.db.connect_with_timeout().await?;
        DatabaseService::begin_immediate(&conn).await?;
        Ok(conn)
    }

    async fn begin_read(&self) -> Result<Connection, HierarchyError> {
        let conn = self.db.connect_with_timeout().await?;
        DatabaseService::begin_read(&conn).await?;
        Ok(conn)
    }

    /// Commit on success, roll back on failure (including a failed commit)
    async fn finish<T>(
        conn: &Connection,
        operation: &str,
        result: Result<T, HierarchyError>,
    ) -> Result<T, HierarchyError> {
        match result {
            Ok(value) => {
                if let Err(e) = DatabaseService::commit(conn).await {
                    DatabaseService::rollback(conn).await;
                    tracing::warn!("{} failed to commit: {}", operation, e);
                    return Err(e.into());
                }
                Ok(value)
            }
            Err(e) => {
                DatabaseService::rollback(conn).await;
                if e.is_not_found() {
                    tracing::debug!("{} rolled back: {}", operation, e);
                } else {
                    tracing::warn!("{} rolled back: {}", operation, e);
                }
                Err(e)
            }
        }
    }

    /// Current time at the microsecond precision rows are stored with
    fn now(&self) -> DateTime<Utc> {
        self.clock.now().trunc_subsecs(6)
    }

    async fn require_on(conn: &Connection, id: NodeId) -> Result<Node, HierarchyError> {
        NodeStore::get(conn, id)
            .await?
            .ok_or_else(|| HierarchyError::node_not_found(id))
    }

    //
    // INSERT
    //

    /// Insert a node under `new_node.parent_id` (a root when `None`)
    ///
    /// Creates the node row, its self edge and one edge per ancestor, runs
    /// `builder` for the domain payload, then moves `modified_at` of every
    /// ancestor forward. Any failure rolls back all of it.
    ///
    /// # Errors
    ///
    /// - `ValidationFailed` for a blank name or one containing `/`
    /// - `ParentNotFound` if the parent does not exist
    /// - `PayloadFailed` if `builder` fails
    /// - `ConcurrentModification` if the write lock could not be obtained
    pub async fn insert_node(
        &self,
        new_node: NewNode,
        builder: &dyn PayloadBuilder,
    ) -> Result<Node, HierarchyError> {
        validate_name(&new_node.name)?;

        let conn = self.begin_write().await?;
        let result = self.insert_in_tx(&conn, &new_node, builder).await;
        let node = Self::finish(&conn, "insert_node", result).await?;

        tracing::info!(
            "Inserted {} node {} at {}",
            node.node_type,
            node.id,
            node.path
        );
        Ok(node)
    }

    async fn insert_in_tx(
        &self,
        conn: &Connection,
        new_node: &NewNode,
        builder: &dyn PayloadBuilder,
    ) -> Result<Node, HierarchyError> {
        let parent = match new_node.parent_id {
            Some(parent_id) => Some(
                NodeStore::get(conn, parent_id)
                    .await?
                    .ok_or_else(|| HierarchyError::parent_not_found(parent_id))?,
            ),
            None => None,
        };

        let now = self.now();
        let node = NodeStore::create(conn, new_node, parent.as_ref().map(|p| p.path.as_str()), now)
            .await?;

        let linked = ClosureIndex::link_new_node(conn, node.id, new_node.parent_id).await?;
        if let (Some(parent_id), 0) = (new_node.parent_id, linked) {
            tracing::warn!("Parent {} has no closure edges", parent_id);
            return Err(HierarchyError::parent_not_found(parent_id));
        }

        builder
            .build(conn, &node)
            .await
            .map_err(|e| HierarchyError::payload_failed(node.id, e))?;

        NodeStore::touch_with_ancestors(conn, &[node.id], now).await?;

        Ok(node)
    }

    //
    // RENAME / MOVE
    //

    /// Rename a node, move it under another parent, or both
    ///
    /// `None` leaves the corresponding attribute unchanged. The node's path
    /// and the path prefix of every descendant are rewritten; on a move the
    /// closure edges of the whole subtree are re-linked under the new parent.
    /// Afterwards `modified_at` is moved forward on the node, its new
    /// ancestors and (after a move) its former ancestors. A call that changes
    /// neither name nor parent returns the node as stored and touches nothing.
    ///
    /// # Errors
    ///
    /// - `NodeNotFound` / `ParentNotFound`
    /// - `InvalidMove` if `new_parent` is the node itself or a descendant
    /// - `ValidationFailed` for an invalid new name
    pub async fn rename_or_move(
        &self,
        node_id: NodeId,
        new_name: Option<&str>,
        new_parent: Option<NodeId>,
    ) -> Result<Node, HierarchyError> {
        if let Some(name) = new_name {
            validate_name(name)?;
        }

        let conn = self.begin_write().await?;
        let result = self
            .rename_or_move_in_tx(&conn, node_id, new_name, new_parent)
            .await;
        let node = Self::finish(&conn, "rename_or_move", result).await?;

        tracing::info!("Updated node {} now at {}", node.id, node.path);
        Ok(node)
    }

    /// Shorthand for [`rename_or_move`](Self::rename_or_move) with only a name
    pub async fn rename(&self, node_id: NodeId, new_name: &str) -> Result<Node, HierarchyError> {
        self.rename_or_move(node_id, Some(new_name), None).await
    }

    /// Shorthand for [`rename_or_move`](Self::rename_or_move) with only a parent
    pub async fn move_node(
        &self,
        node_id: NodeId,
        new_parent: NodeId,
    ) -> Result<Node, HierarchyError> {
        self.rename_or_move(node_id, None, Some(new_parent)).await
    }

    async fn rename_or_move_in_tx(
        &self,
        conn: &Connection,
        node_id: NodeId,
        new_name: Option<&str>,
        new_parent: Option<NodeId>,
    ) -> Result<Node, HierarchyError> {
        let node = Self::require_on(conn, node_id).await?;
        let name = new_name.unwrap_or(&node.name).to_string();
        let now = self.now();
        let moving_to = new_parent.filter(|target| Some(*target) != node.parent_id);
        if moving_to.is_none() && name == node.name {
            return Ok(node);
        }

        let parent_path = match moving_to {
            Some(target) => {
                let parent = NodeStore::get(conn, target)
                    .await?
                    .ok_or_else(|| HierarchyError::parent_not_found(target))?;
                if ClosureIndex::is_ancestor_or_self(conn, node_id, target).await? {
                    return Err(HierarchyError::InvalidMove {
                        node_id,
                        new_parent_id: target,
                    });
                }

                let (dropped, added) = ClosureIndex::relink_subtree(conn, node_id, target).await?;
                NodeStore::set_parent(conn, node_id, target).await?;
                tracing::debug!(
                    "Relinked subtree of {} under {}: -{} +{} closure edges",
                    node_id,
                    target,
                    dropped,
                    added
                );
                Some(parent.path)
            }
            None => match node.parent_id {
                Some(parent_id) => Some(
                    NodeStore::get(conn, parent_id)
                        .await?
                        .ok_or_else(|| {
                            HierarchyError::integrity_violation(
                                node_id,
                                format!("parent {} does not exist", parent_id),
                            )
                        })?
                        .path,
                ),
                None => None,
            },
        };

        let new_path = child_path(parent_path.as_deref(), &name);
        if name != node.name || new_path != node.path {
            let rewritten = NodeStore::rename(conn, node_id, &name, &node.path, &new_path).await?;
            tracing::debug!(
                "Renamed {} -> {} ({} descendant paths rewritten)",
                node.path,
                new_path,
                rewritten
            );
        }

        let mut touched = vec![node_id];
        if let (Some(_), Some(old_parent)) = (moving_to, node.parent_id) {
            touched.push(old_parent);
        }
        NodeStore::touch_with_ancestors(conn, &touched, now).await?;

        Self::require_on(conn, node_id).await
    }

    //
    // DELETE
    //

    /// Delete the subtree rooted at `node_id`, using the registered cleanups
    ///
    /// See [`delete_subtree_with`](Self::delete_subtree_with).
    pub async fn delete_subtree(&self, node_id: NodeId) -> Result<BTreeSet<NodeId>, HierarchyError> {
        self.delete_subtree_with(node_id, &self.payloads).await
    }

    /// Delete the subtree rooted at `node_id`
    ///
    /// Removes every closure edge touching the subtree, then, deepest nodes
    /// first, runs `cleanup` for each node and deletes its row. Finally the
    /// former parent and its ancestors get their `modified_at` moved forward.
    /// Returns the removed ids.
    ///
    /// # Errors
    ///
    /// - `NodeNotFound` if `node_id` does not exist
    /// - `PayloadFailed` if `cleanup` fails for any node
    /// - `IntegrityViolation` if a row (typically an uncleaned payload) still
    ///   references a node being deleted
    pub async fn delete_subtree_with(
        &self,
        node_id: NodeId,
        cleanup: &dyn PayloadCleanup,
    ) -> Result<BTreeSet<NodeId>, HierarchyError> {
        let conn = self.begin_write().await?;
        let result = self.delete_in_tx(&conn, node_id, cleanup).await;
        let removed = Self::finish(&conn, "delete_subtree", result).await?;

        tracing::info!("Deleted subtree of node {} ({} nodes)", node_id, removed.len());
        Ok(removed)
    }

    async fn delete_in_tx(
        &self,
        conn: &Connection,
        node_id: NodeId,
        cleanup: &dyn PayloadCleanup,
    ) -> Result<BTreeSet<NodeId>, HierarchyError> {
        let root = Self::require_on(conn, node_id).await?;
        let now = self.now();

        let mut nodes: HashMap<NodeId, Node> = NodeStore::subtree(conn, node_id)
            .await?
            .into_iter()
            .map(|n| (n.id, n))
            .collect();

        let mut order = ClosureIndex::unlink_subtree(conn, node_id).await?;
        if order.is_empty() {
            tracing::warn!("Node {} has no closure self edge, deleting it alone", node_id);
            order.push(node_id);
            nodes.insert(node_id, root.clone());
        }

        for id in &order {
            let Some(node) = nodes.get(id) else {
                continue;
            };
            cleanup
                .cleanup(conn, node)
                .await
                .map_err(|e| HierarchyError::payload_failed(*id, e))?;
            NodeStore::delete_row(conn, *id).await.map_err(|e| match e {
                DatabaseError::ForeignKeyViolation { context } => {
                    HierarchyError::integrity_violation(*id, context)
                }
                other => other.into(),
            })?;
        }

        if let Some(parent_id) = root.parent_id {
            NodeStore::touch_with_ancestors(conn, &[parent_id], now).await?;
        }

        Ok(order.into_iter().collect())
    }

    //
    // TIMESTAMPS
    //

    /// Move `modified_at` of `node_id` and every ancestor forward to `when`
    ///
    /// Rows already at or after `when` are left alone, so the call is
    /// idempotent and concurrent propagations commute. Returns the number
    /// of rows changed.
    pub async fn propagate_modified(
        &self,
        node_id: NodeId,
        when: DateTime<Utc>,
    ) -> Result<u64, HierarchyError> {
        let conn = self.begin_write().await?;
        let result: Result<u64, HierarchyError> = async {
            Self::require_on(&conn, node_id).await?;
            Ok(NodeStore::touch_with_ancestors(&conn, &[node_id], when).await?)
        }
        .await;
        let changed = Self::finish(&conn, "propagate_modified", result).await?;

        tracing::debug!("Propagated modified_at from node {}: {} rows", node_id, changed);
        Ok(changed)
    }

    /// [`propagate_modified`](Self::propagate_modified) for many nodes in one
    /// statement; each shared ancestor is updated once
    ///
    /// Ids that do not exist are ignored.
    pub async fn propagate_modified_many(
        &self,
        node_ids: &[NodeId],
        when: DateTime<Utc>,
    ) -> Result<u64, HierarchyError> {
        if node_ids.is_empty() {
            return Ok(0);
        }
        let conn = self.begin_write().await?;
        let result = NodeStore::touch_with_ancestors(&conn, node_ids, when)
            .await
            .map_err(HierarchyError::from);
        let changed = Self::finish(&conn, "propagate_modified_many", result).await?;

        tracing::debug!(
            "Propagated modified_at from {} nodes: {} rows",
            node_ids.len(),
            changed
        );
        Ok(changed)
    }

    /// Set the lifecycle marker of one node
    ///
    /// Touches only the node itself; ancestors are not propagated.
    pub async fn update_status(
        &self,
        node_id: NodeId,
        status: LifecycleStatus,
    ) -> Result<Node, HierarchyError> {
        let conn = self.begin_write().await?;
        let result: Result<Node, HierarchyError> = async {
            Self::require_on(&conn, node_id).await?;
            NodeStore::set_status(&conn, node_id, status, self.now()).await?;
            Self::require_on(&conn, node_id).await
        }
        .await;
        let node = Self::finish(&conn, "update_status", result).await?;

        tracing::info!("Node {} status set to {}", node_id, status);
        Ok(node)
    }

    /// Apply a domain payload change and propagate `modified_at` to the node
    /// and its ancestors, in one transaction
    pub async fn update_payload(
        &self,
        node_id: NodeId,
        updater: &dyn PayloadUpdater,
    ) -> Result<Node, HierarchyError> {
        let conn = self.begin_write().await?;
        let result: Result<Node, HierarchyError> = async {
            let node = Self::require_on(&conn, node_id).await?;
            let now = self.now();
            updater
                .update(&conn, &node)
                .await
                .map_err(|e| HierarchyError::payload_failed(node_id, e))?;
            NodeStore::touch_with_ancestors(&conn, &[node_id], now).await?;
            Self::require_on(&conn, node_id).await
        }
        .await;
        Self::finish(&conn, "update_payload", result).await
    }

    //
    // QUERIES
    //

    pub async fn get_node(&self, node_id: NodeId) -> Result<Option<Node>, HierarchyError> {
        let conn = self.db.connect_with_timeout().await?;
        Ok(NodeStore::get(&conn, node_id).await?)
    }

    /// Like [`get_node`](Self::get_node) but a missing node is an error
    pub async fn require_node(&self, node_id: NodeId) -> Result<Node, HierarchyError> {
        let conn = self.db.connect_with_timeout().await?;
        Self::require_on(&conn, node_id).await
    }

    /// Ancestors of `node_id` at `depth >= min_depth`, nearest first
    ///
    /// `min_depth = 0` includes the node itself.
    pub async fn ancestors_of(
        &self,
        node_id: NodeId,
        min_depth: i64,
    ) -> Result<Vec<AncestorEntry>, HierarchyError> {
        let conn = self.begin_read().await?;
        let result: Result<Vec<AncestorEntry>, HierarchyError> = async {
            Self::require_on(&conn, node_id).await?;
            Ok(ClosureIndex::ancestors_of(&conn, node_id, min_depth).await?)
        }
        .await;
        Self::finish(&conn, "ancestors_of", result).await
    }

    /// Descendants of `node_id` at `depth >= min_depth`
    pub async fn descendants_of(
        &self,
        node_id: NodeId,
        min_depth: i64,
    ) -> Result<BTreeSet<NodeId>, HierarchyError> {
        let conn = self.begin_read().await?;
        let result: Result<BTreeSet<NodeId>, HierarchyError> = async {
            Self::require_on(&conn, node_id).await?;
            Ok(ClosureIndex::descendants_of(&conn, node_id, min_depth).await?)
        }
        .await;
        Self::finish(&conn, "descendants_of", result).await
    }

    /// Closest strict ancestor of the given type, e.g. the client owning a part
    pub async fn nearest_ancestor_of_type(
        &self,
        node_id: NodeId,
        node_type: NodeType,
    ) -> Result<Option<Node>, HierarchyError> {
        let conn = self.begin_read().await?;
        let result: Result<Option<Node>, HierarchyError> = async {
            Self::require_on(&conn, node_id).await?;
            let ancestors = ClosureIndex::ancestors_of(&conn, node_id, 1).await?;
            match ancestors.into_iter().find(|a| a.node_type == node_type) {
                Some(entry) => Ok(NodeStore::get(&conn, entry.id).await?),
                None => Ok(None),
            }
        }
        .await;
        Self::finish(&conn, "nearest_ancestor_of_type", result).await
    }

    /// Strict descendants of the given type within `max_depth` levels (any
    /// depth when `None`), most recently modified first
    pub async fn descendants_of_type(
        &self,
        node_id: NodeId,
        node_type: NodeType,
        max_depth: Option<i64>,
    ) -> Result<Vec<Node>, HierarchyError> {
        let conn = self.begin_read().await?;
        let result: Result<Vec<Node>, HierarchyError> = async {
            Self::require_on(&conn, node_id).await?;
            Ok(NodeStore::descendants_of_type(&conn, node_id, node_type, max_depth).await?)
        }
        .await;
        Self::finish(&conn, "descendants_of_type", result).await
    }

    /// One page of the direct children of `parent` (roots when `None`),
    /// most recently modified first, with the total child count
    pub async fn children(
        &self,
        parent: Option<NodeId>,
        limit: u64,
        offset: u64,
    ) -> Result<ChildPage, HierarchyError> {
        let conn = self.begin_read().await?;
        let result: Result<ChildPage, HierarchyError> = async {
            if let Some(parent_id) = parent {
                Self::require_on(&conn, parent_id).await?;
            }
            let nodes = NodeStore::children(&conn, parent, limit, offset).await?;
            let total = NodeStore::count_children(&conn, parent).await?;
            Ok(ChildPage { nodes, total })
        }
        .await;
        Self::finish(&conn, "children", result).await
    }

    /// Root nodes of one type, most recently modified first
    pub async fn roots_of_type(&self, node_type: NodeType) -> Result<Vec<Node>, HierarchyError> {
        let conn = self.db.connect_with_timeout().await?;
        Ok(NodeStore::roots_of_type(&conn, node_type).await?)
    }

    /// Name for a new child of `parent` that does not clash with its siblings
    ///
    /// Returns `base` if free, otherwise `base(N+1)` where `N` is the highest
    /// existing `base(N)` suffix (0 if there is none).
    pub async fn unique_child_name(
        &self,
        parent: Option<NodeId>,
        base: &str,
    ) -> Result<String, HierarchyError> {
        validate_name(base)?;
        let conn = self.db.connect_with_timeout().await?;
        if let Some(parent_id) = parent {
            NodeStore::get(&conn, parent_id)
                .await?
                .ok_or_else(|| HierarchyError::parent_not_found(parent_id))?;
        }
        let siblings = NodeStore::child_names(&conn, parent).await?;
        Ok(next_available_name(base, &siblings))
    }

    /// Compare the closure table and paths against parent pointers
    pub async fn verify_integrity(&self) -> Result<IntegrityReport, HierarchyError> {
        let conn = self.begin_read().await?;
        let result = verify_integrity(&conn).await.map_err(HierarchyError::from);
        Self::finish(&conn, "verify_integrity", result).await
    }
}

/// `base` if unused, else `base(max + 1)` over the existing `base(N)` names
fn next_available_name(base: &str, existing: &[String]) -> String {
    if !existing.iter().any(|name| name == base) {
        return base.to_string();
    }
    let highest = existing
        .iter()
        .filter_map(|name| {
            name.strip_prefix(base)?
                .strip_prefix('(')?
                .strip_suffix(')')?
                .parse::<u32>()
                .ok()
        })
        .max()
        .unwrap_or(0);
    format!("{}({})", base, highest + 1)
}
