//! Database Layer
//!
//! This module handles all database interactions using libsql:
//!
//! - Database initialization and connection management
//! - Transaction boundaries (`BEGIN IMMEDIATE` / `COMMIT` / `ROLLBACK`)
//! - `NodeStore`: SQL for the canonical `nodes` table and path maintenance
//! - `ClosureIndex`: SQL for the `node_closure` transitive-closure table
//!
//! Mutating functions of `NodeStore` and `ClosureIndex` are crate-private:
//! the hierarchy engine is the only sanctioned writer of both tables.

mod closure_index;
mod database;
mod error;
mod node_store;

pub use closure_index::ClosureIndex;
pub use database::DatabaseService;
pub use error::DatabaseError;
pub use node_store::NodeStore;
