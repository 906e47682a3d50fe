//! Payload Callbacks - domain hooks into hierarchy transactions
//!
//! Domain services (clients, trials, furnaces, …) keep their type-specific
//! data in their own tables keyed by node id. The hierarchy engine never
//! reads those tables; instead it calls back into the domain service from
//! inside its own transaction:
//!
//! - [`PayloadBuilder`] after a node row and its closure edges exist
//! - [`PayloadUpdater`] when a domain service changes payload fields
//! - [`PayloadCleanup`] for every node removed by a subtree delete, before
//!   the node row itself is deleted
//!
//! Callbacks receive the transaction's connection and must not commit or
//! roll back. Returning an error aborts the whole operation.
//!
//! # Examples
//!
//! ```rust,no_run
//! use synergia_core::services::{DeleteByNodeId, HierarchyEngine};
//! use synergia_core::models::NodeType;
//! use std::sync::Arc;
//!
//! # fn example(engine: &mut HierarchyEngine) -> anyhow::Result<()> {
//! engine.register_cleanup(NodeType::Furnace, Arc::new(DeleteByNodeId::new("furnace_data")?));
//! # Ok(())
//! # }
//! ```

use crate::models::{Node, NodeType};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use libsql::Connection;
use std::collections::HashMap;
use std::sync::Arc;

/// Creates the type-specific payload of a freshly inserted node
#[async_trait]
pub trait PayloadBuilder: Send + Sync {
    /// Called once per insert, after the node row and closure edges exist
    async fn build(&self, conn: &Connection, node: &Node) -> Result<()>;
}

/// Applies a payload change to an existing node
#[async_trait]
pub trait PayloadUpdater: Send + Sync {
    async fn update(&self, conn: &Connection, node: &Node) -> Result<()>;
}

/// Removes the type-specific payload of a node about to be deleted
#[async_trait]
pub trait PayloadCleanup: Send + Sync {
    /// Called once per removed node, deepest nodes first
    async fn cleanup(&self, conn: &Connection, node: &Node) -> Result<()>;
}

/// Node types that carry no payload
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPayload;

#[async_trait]
impl PayloadBuilder for NoPayload {
    async fn build(&self, _conn: &Connection, _node: &Node) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl PayloadCleanup for NoPayload {
    async fn cleanup(&self, _conn: &Connection, _node: &Node) -> Result<()> {
        Ok(())
    }
}

/// Cleanup for the common one-table layout: `DELETE FROM <table> WHERE node_id = ?`
#[derive(Debug, Clone)]
pub struct DeleteByNodeId {
    table: String,
}

impl DeleteByNodeId {
    /// Table names are interpolated into SQL, so only `[A-Za-z0-9_]` is accepted
    pub fn new(table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        if table.is_empty()
            || table.starts_with(|c: char| c.is_ascii_digit())
            || !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            bail!("Invalid payload table name '{}'", table);
        }
        Ok(Self { table })
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

#[async_trait]
impl PayloadCleanup for DeleteByNodeId {
    async fn cleanup(&self, conn: &Connection, node: &Node) -> Result<()> {
        conn.execute(
            &format!("DELETE FROM {} WHERE node_id = ?", self.table),
            [node.id],
        )
        .await
        .with_context(|| format!("Failed to clean up {} for node {}", self.table, node.id))?;
        Ok(())
    }
}

/// Per-type cleanup registrations
///
/// Types without a registration are treated as payload-free. If such a type
/// does have payload rows, the foreign key on those rows fails the delete.
#[derive(Clone, Default)]
pub struct PayloadRegistry {
    cleanups: HashMap<NodeType, Arc<dyn PayloadCleanup>>,
}

impl PayloadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the cleanup for one node type
    pub fn register(&mut self, node_type: NodeType, cleanup: Arc<dyn PayloadCleanup>) {
        if self.cleanups.insert(node_type, cleanup).is_some() {
            tracing::debug!("Replaced payload cleanup for {}", node_type);
        }
    }

    pub fn is_registered(&self, node_type: NodeType) -> bool {
        self.cleanups.contains_key(&node_type)
    }

    pub fn len(&self) -> usize {
        self.cleanups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cleanups.is_empty()
    }
}

impl std::fmt::Debug for PayloadRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&str> = self.cleanups.keys().map(|t| t.as_str()).collect();
        types.sort_unstable();
        f.debug_struct("PayloadRegistry")
            .field("registered", &types)
            .finish()
    }
}

#[async_trait]
impl PayloadCleanup for PayloadRegistry {
    async fn cleanup(&self, conn: &Connection, node: &Node) -> Result<()> {
        match self.cleanups.get(&node.node_type) {
            Some(cleanup) => cleanup.cleanup(conn, node).await,
            None => Ok(()),
        }
    }
}
