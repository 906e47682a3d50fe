//! Synergia Core Hierarchy Layer
//!
//! This crate provides the hierarchical storage engine behind the Synergia
//! laboratory data system: every business entity (client, trial request,
//! part, trial, steel, file, furnace) is a node in one forest, and this crate
//! keeps that forest consistent.
//!
//! # Architecture
//!
//! - **Canonical node row**: type tag, name, materialized path, parent pointer,
//!   lifecycle status and timestamps in one `nodes` table
//! - **Closure table**: `node_closure` answers ancestor/descendant queries
//!   without recursion
//! - **Payload callbacks**: type-specific data lives in domain tables, written
//!   from inside engine transactions
//! - **libsql**: embedded SQLite-compatible database, WAL mode
//!
//! # Modules
//!
//! - [`config`] - Database location and concurrency settings
//! - [`models`] - Data structures (Node, ClosureEdge, clock)
//! - [`db`] - Database layer with libsql integration
//! - [`services`] - Hierarchy engine, payload hooks, integrity check

pub mod config;
pub mod db;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use config::HierarchyConfig;
pub use models::*;
pub use services::*;
