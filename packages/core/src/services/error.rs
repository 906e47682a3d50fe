//! Service Layer Error Types
//!
//! This module defines the errors surfaced by the hierarchy engine to the
//! domain services that call it.
//!
//! # Propagation
//!
//! - `ParentNotFound` / `NodeNotFound`: validation errors, map to "not found"
//!   at the application boundary
//! - `IntegrityViolation`: a payload row still referenced a node being
//!   deleted (a missing cleanup registration). The transaction was rolled
//!   back; not retryable
//! - `ConcurrentModification`: the write lock could not be obtained or the
//!   commit conflicted. Nothing was applied; safe to retry from scratch
//!   (see [`with_retry`](crate::services::with_retry))

use crate::db::DatabaseError;
use crate::models::{NodeId, ValidationError};
use thiserror::Error;

/// Hierarchy engine errors
#[derive(Error, Debug)]
pub enum HierarchyError {
    /// Parent referenced by an insert or move does not exist
    #[error("Parent node not found: {parent_id}")]
    ParentNotFound { parent_id: NodeId },

    /// Node referenced by an operation does not exist
    #[error("Node not found: {id}")]
    NodeNotFound { id: NodeId },

    /// The store's referential-integrity check rejected a mutation
    #[error("Integrity violation{}: {context}", node_id.map(|id| format!(" on node {}", id)).unwrap_or_default())]
    IntegrityViolation {
        node_id: Option<NodeId>,
        context: String,
    },

    /// Transaction could not acquire the write lock or commit
    #[error("Concurrent modification: {context}")]
    ConcurrentModification { context: String },

    /// Move target is the node itself or one of its descendants
    #[error("Cannot move node {node_id} under {new_parent_id}: target is inside the moved subtree")]
    InvalidMove {
        node_id: NodeId,
        new_parent_id: NodeId,
    },

    /// Name or tag validation failed
    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),

    /// A domain payload callback failed; the transaction was rolled back
    #[error("Payload callback failed for node {node_id}: {source}")]
    PayloadFailed {
        node_id: NodeId,
        #[source]
        source: anyhow::Error,
    },

    /// Database operation failed
    #[error("Database operation failed: {0}")]
    DatabaseError(DatabaseError),
}

impl HierarchyError {
    /// Create a node not found error
    pub fn node_not_found(id: NodeId) -> Self {
        Self::NodeNotFound { id }
    }

    /// Create a parent not found error
    pub fn parent_not_found(parent_id: NodeId) -> Self {
        Self::ParentNotFound { parent_id }
    }

    /// Create an integrity violation for a specific node
    pub fn integrity_violation(node_id: NodeId, context: impl Into<String>) -> Self {
        Self::IntegrityViolation {
            node_id: Some(node_id),
            context: context.into(),
        }
    }

    /// Create a payload callback error
    pub fn payload_failed(node_id: NodeId, source: anyhow::Error) -> Self {
        Self::PayloadFailed { node_id, source }
    }

    /// Whether re-running the whole operation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. })
    }

    /// Whether this maps to "not found" at the application boundary
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NodeNotFound { .. } | Self::ParentNotFound { .. }
        )
    }
}

impl From<DatabaseError> for HierarchyError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Busy { context } => Self::ConcurrentModification { context },
            DatabaseError::ForeignKeyViolation { context } => Self::IntegrityViolation {
                node_id: None,
                context,
            },
            other => Self::DatabaseError(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_maps_to_concurrent_modification() {
        let err: HierarchyError = DatabaseError::Busy {
            context: "Failed to begin transaction: database is locked".into(),
        }
        .into();
        assert!(err.is_retryable());
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_foreign_key_maps_to_integrity_violation() {
        let err: HierarchyError = DatabaseError::ForeignKeyViolation {
            context: "Failed to delete node 4".into(),
        }
        .into();
        assert!(matches!(
            err,
            HierarchyError::IntegrityViolation { node_id: None, .. }
        ));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            HierarchyError::parent_not_found(9).to_string(),
            "Parent node not found: 9"
        );
        assert_eq!(
            HierarchyError::integrity_violation(3, "payload row remains").to_string(),
            "Integrity violation on node 3: payload row remains"
        );
        assert!(HierarchyError::node_not_found(1).is_not_found());
    }
}
