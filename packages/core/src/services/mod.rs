//! Business Services
//!
//! This module contains the hierarchy engine and its collaborators:
//!
//! - `HierarchyEngine` - transactional insert, rename/move, subtree delete,
//!   timestamp propagation and tree queries
//! - `payload` - callbacks through which domain services attach and remove
//!   their type-specific data inside engine transactions
//! - `integrity` - consistency check of the closure table and paths
//! - `retry` - re-running operations that lost the write lock
//!
//! Domain services (clients, trial requests, furnaces, …) build on the engine
//! and never write the `nodes` or `node_closure` tables themselves.

pub mod error;
pub mod hierarchy_engine;
pub mod integrity;
pub mod payload;
pub mod retry;

pub use error::HierarchyError;
pub use hierarchy_engine::HierarchyEngine;
pub use integrity::{verify_integrity, IntegrityReport, PathMismatch};
pub use payload::{
    DeleteByNodeId, NoPayload, PayloadBuilder, PayloadCleanup, PayloadRegistry, PayloadUpdater,
};
pub use retry::with_retry;
