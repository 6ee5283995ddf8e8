//! Error types for the synchronization engine.

use thiserror::Error;
use tokio_postgres::error::SqlState;

use crate::orchestrator::Role;

/// Main error type for sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// PostgreSQL query or connection error
    #[error("PostgreSQL error: {0}")]
    Postgres(#[source] tokio_postgres::Error),

    /// The session's transaction is aborted (SQLSTATE 25P02); statements
    /// fail until it is rolled back
    #[error("Transaction aborted: {0}")]
    TransactionAborted(String),

    /// SQLite query or connection error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Catalog introspection failed
    #[error("Schema introspection failed: {0}")]
    Schema(String),

    /// Data transfer failed for a specific table
    #[error("Transfer failed for table {table}: {message}")]
    Transfer { table: String, message: String },

    /// A job referenced a backend role that has no configuration
    #[error("Backend role '{0}' is not configured")]
    NotConfigured(Role),

    /// Worker process could not be started or talked to
    #[error("Worker error: {0}")]
    Worker(String),

    /// IO error (files, pipes)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Sync was cancelled by the caller
    #[error("Sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl std::fmt::Display, context: impl Into<String>) -> Self {
        SyncError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Transfer error
    pub fn transfer(table: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::Transfer {
            table: table.into(),
            message: message.into(),
        }
    }

    /// True when the server rejected a statement because the surrounding
    /// transaction is already aborted (SQLSTATE 25P02).
    pub fn is_transaction_aborted(&self) -> bool {
        matches!(self, SyncError::TransactionAborted(_))
    }

    /// True when the underlying connection is gone and further statements
    /// on it cannot succeed.
    pub fn is_connection_lost(&self) -> bool {
        match self {
            SyncError::Postgres(e) => e.is_closed(),
            SyncError::Sqlite(e) => matches!(
                e,
                sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)
            ),
            SyncError::Pool { .. } => true,
            _ => false,
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            SyncError::Config(_) | SyncError::NotConfigured(_) | SyncError::Yaml(_) => 2,
            _ => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

impl From<tokio_postgres::Error> for SyncError {
    fn from(e: tokio_postgres::Error) -> Self {
        if e.code() == Some(&SqlState::IN_FAILED_SQL_TRANSACTION) {
            let message = e
                .as_db_error()
                .map(|db| db.message().to_string())
                .unwrap_or_else(|| e.to_string());
            return SyncError::TransactionAborted(message);
        }
        SyncError::Postgres(e)
    }
}

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
