//! Database Connection Management
//!
//! This module provides the database connection, schema initialization and
//! transaction boundaries for the hierarchy tables, using libsql.
//!
//! # Architecture
//!
//! - **Path-agnostic**: Accepts any valid PathBuf
//! - **WAL mode**: readers never block the single writer
//! - **Foreign keys**: enabled on every connection; the closure table and
//!   payload tables reference `nodes(id)` without cascade, so a forgotten
//!   cleanup fails the delete instead of leaving dangling rows
//! - **Write transactions**: `BEGIN IMMEDIATE` takes the write lock up front,
//!   so two writers queue on the busy timeout instead of deadlocking on a
//!   read-to-write upgrade
//!
//! # Tables
//!
//! - `nodes`: one row per tree element (type tag, name, materialized path,
//!   parent pointer, lifecycle status, timestamps)
//! - `node_closure`: `(ancestor_id, descendant_id, depth)` for every connected
//!   ordered pair, including depth-0 self edges

use crate::config::HierarchyConfig;
use crate::db::error::DatabaseError;
use libsql::{Builder, Connection, Database};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Database service for managing the libsql connection and schema
///
/// # Examples
///
/// ```no_run
/// use synergia_core::db::DatabaseService;
/// use std::path::PathBuf;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let db_path = PathBuf::from("/path/to/synergia.db");
///     let db_service = DatabaseService::new(db_path).await?;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct DatabaseService {
    /// libsql database handle (wrapped in Arc for sharing)
    pub db: Arc<Database>,

    /// Path to the database file
    pub db_path: PathBuf,

    busy_timeout: Duration,
}

impl DatabaseService {
    /// Open (or create) a database with default settings
    pub async fn new(db_path: PathBuf) -> Result<Self, DatabaseError> {
        Self::open(&HierarchyConfig::with_db_path(db_path)).await
    }

    /// Open (or create) the database described by `config`
    ///
    /// This will:
    /// 1. Ensure the parent directory exists (create if needed)
    /// 2. Open/create the database file
    /// 3. Initialize the schema (CREATE TABLE IF NOT EXISTS)
    pub async fn open(config: &HierarchyConfig) -> Result<Self, DatabaseError> {
        let db_path = config.db_path.clone();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::PermissionDenied {
                        DatabaseError::permission_denied(db_path.clone())
                    } else {
                        DatabaseError::DirectoryCreationFailed(e)
                    }
                })?;
            }
        }

        let db = Builder::new_local(&db_path)
            .build()
            .await
            .map_err(|e| DatabaseError::connection_failed(db_path.clone(), e))?;

        let service = Self {
            db: Arc::new(db),
            db_path,
            busy_timeout: config.busy_timeout,
        };

        service.initialize_schema().await?;
        tracing::info!("Opened hierarchy database at {}", service.db_path.display());

        Ok(service)
    }

    /// Execute a PRAGMA statement
    ///
    /// PRAGMA statements return rows, so we must use query() instead of execute().
    async fn execute_pragma(conn: &Connection, pragma: &str) -> Result<(), DatabaseError> {
        let mut stmt = conn.prepare(pragma).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        let _ = stmt.query(()).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        Ok(())
    }

    /// Initialize database schema
    ///
    /// Idempotent (safe to call multiple times).
    async fn initialize_schema(&self) -> Result<(), DatabaseError> {
        let conn = self.connect_with_timeout().await?;

        Self::execute_pragma(&conn, "PRAGMA journal_mode = WAL").await?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS nodes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                node_type TEXT NOT NULL,
                name TEXT NOT NULL,
                path TEXT NOT NULL,
                parent_id INTEGER,
                description TEXT,
                data_status TEXT NOT NULL DEFAULT 'old',
                created_at TEXT NOT NULL,
                modified_at TEXT NOT NULL,
                FOREIGN KEY (parent_id) REFERENCES nodes(id)
            )",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::initialization_failed(format!("Failed to create nodes table: {}", e))
        })?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS node_closure (
                ancestor_id INTEGER NOT NULL,
                descendant_id INTEGER NOT NULL,
                depth INTEGER NOT NULL CHECK (depth >= 0),
                PRIMARY KEY (ancestor_id, descendant_id),
                FOREIGN KEY (ancestor_id) REFERENCES nodes(id),
                FOREIGN KEY (descendant_id) REFERENCES nodes(id)
            )",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::initialization_failed(format!(
                "Failed to create node_closure table: {}",
                e
            ))
        })?;

        self.create_core_indexes(&conn).await?;

        Ok(())
    }

    /// Create core indexes for the hierarchy tables
    async fn create_core_indexes(&self, conn: &Connection) -> Result<(), DatabaseError> {
        let indexes = [
            // Children listing and FK checks on parent deletion
            ("idx_nodes_parent", "nodes(parent_id)"),
            ("idx_nodes_type", "nodes(node_type)"),
            ("idx_nodes_status", "nodes(data_status)"),
            ("idx_nodes_modified", "nodes(modified_at)"),
            // Ancestor lookups (the primary key already serves descendant lookups)
            ("idx_closure_descendant", "node_closure(descendant_id, depth)"),
        ];

        for (name, target) in indexes {
            conn.execute(
                &format!("CREATE INDEX IF NOT EXISTS {} ON {}", name, target),
                (),
            )
            .await
            .map_err(|e| {
                DatabaseError::initialization_failed(format!(
                    "Failed to create index '{}': {}",
                    name, e
                ))
            })?;
        }

        Ok(())
    }

    /// Get a raw connection to the database
    ///
    /// Prefer [`connect_with_timeout`](Self::connect_with_timeout): a raw
    /// connection has neither the busy timeout nor foreign keys enabled.
    pub fn connect(&self) -> Result<Connection, DatabaseError> {
        self.db.connect().map_err(DatabaseError::LibsqlError)
    }

    /// Get a connection configured for engine use
    ///
    /// Sets the busy timeout so concurrent writers wait for the lock instead of
    /// failing immediately, and turns on foreign key enforcement (a
    /// per-connection setting in SQLite).
    pub async fn connect_with_timeout(&self) -> Result<Connection, DatabaseError> {
        let conn = self.connect()?;

        Self::execute_pragma(
            &conn,
            &format!("PRAGMA busy_timeout = {}", self.busy_timeout.as_millis()),
        )
        .await?;
        Self::execute_pragma(&conn, "PRAGMA foreign_keys = ON").await?;

        Ok(conn)
    }

    /// Start a write transaction holding the database write lock
    pub async fn begin_immediate(conn: &Connection) -> Result<(), DatabaseError> {
        conn.execute("BEGIN IMMEDIATE", ())
            .await
            .map_err(|e| DatabaseError::from_libsql("Failed to begin transaction", e))?;
        Ok(())
    }

    /// Start a read transaction (consistent snapshot for multi-statement reads)
    pub async fn begin_read(conn: &Connection) -> Result<(), DatabaseError> {
        conn.execute("BEGIN DEFERRED", ())
            .await
            .map_err(|e| DatabaseError::from_libsql("Failed to begin transaction", e))?;
        Ok(())
    }

    pub async fn commit(conn: &Connection) -> Result<(), DatabaseError> {
        conn.execute("COMMIT", ())
            .await
            .map_err(|e| DatabaseError::from_libsql("Failed to commit transaction", e))?;
        Ok(())
    }

    /// Roll back the open transaction
    ///
    /// Never fails: if the rollback itself errors, SQLite has already
    /// abandoned the transaction.
    pub async fn rollback(conn: &Connection) {
        if let Err(e) = conn.execute("ROLLBACK", ()).await {
            tracing::debug!("Rollback reported: {}", e);
        }
    }

    /// Run an arbitrary DDL/DML batch, e.g. a domain service creating its
    /// payload tables
    pub async fn execute_batch(&self, sql: &str) -> Result<(), DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        conn.execute_batch(sql)
            .await
            .map_err(|e| DatabaseError::from_libsql("Failed to execute batch", e))?;
        Ok(())
    }
}
