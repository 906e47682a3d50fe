//! Database Error Types
//!
//! This module defines error types for database operations, providing
//! clear error handling for connection, initialization, and query failures.
//!
//! libsql reports every SQLite failure as text, so [`DatabaseError::from_libsql`]
//! sorts the two failures the engine reacts to (lock contention and
//! foreign-key rejection) into their own variants.

use std::path::PathBuf;
use thiserror::Error;

/// Database operation errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to establish database connection
    #[error("Failed to connect to database at {path}: {source}")]
    ConnectionFailed {
        path: PathBuf,
        source: libsql::Error,
    },

    /// Failed to initialize database schema
    #[error("Failed to initialize database schema: {0}")]
    InitializationFailed(String),

    /// Permission denied when accessing database
    #[error("Permission denied for database path: {path}")]
    PermissionDenied { path: PathBuf },

    /// Failed to create parent directory
    #[error("Failed to create parent directory for database: {0}")]
    DirectoryCreationFailed(#[from] std::io::Error),

    /// libsql operation error
    #[error("Database operation failed: {0}")]
    LibsqlError(#[from] libsql::Error),

    /// The database stayed locked by another writer past the busy timeout
    #[error("Database busy: {context}")]
    Busy { context: String },

    /// A statement was rejected by a foreign key constraint
    #[error("Foreign key constraint failed: {context}")]
    ForeignKeyViolation { context: String },

    /// A stored value could not be decoded
    #[error("Corrupt row: {context}")]
    CorruptRow { context: String },

    /// SQL execution error with context
    #[error("SQL execution failed: {context}")]
    SqlExecutionError { context: String },
}

impl DatabaseError {
    /// Create a connection failed error
    pub fn connection_failed(path: PathBuf, source: libsql::Error) -> Self {
        Self::ConnectionFailed { path, source }
    }

    /// Create an initialization failed error
    pub fn initialization_failed(msg: impl Into<String>) -> Self {
        Self::InitializationFailed(msg.into())
    }

    /// Create a permission denied error
    pub fn permission_denied(path: PathBuf) -> Self {
        Self::PermissionDenied { path }
    }

    /// Create a SQL execution error with context
    pub fn sql_execution(context: impl Into<String>) -> Self {
        Self::SqlExecutionError {
            context: context.into(),
        }
    }

    /// Create a corrupt row error
    pub fn corrupt_row(context: impl Into<String>) -> Self {
        Self::CorruptRow {
            context: context.into(),
        }
    }

    /// Classify a libsql failure, prefixing `context`
    pub fn from_libsql(context: &str, err: libsql::Error) -> Self {
        let message = err.to_string();
        let lowered = message.to_ascii_lowercase();
        let context = format!("{}: {}", context, message);

        if lowered.contains("foreign key constraint failed") {
            Self::ForeignKeyViolation { context }
        } else if lowered.contains("database is locked")
            || lowered.contains("database table is locked")
            || lowered.contains("sqlite_busy")
            || lowered.contains("database is busy")
        {
            Self::Busy { context }
        } else {
            Self::SqlExecutionError { context }
        }
    }
}
