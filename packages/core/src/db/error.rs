//! Database Error Types
//!
//! Two layers of storage errors:
//!
//! - [`DatabaseError`] covers opening the database file and initializing
//!   the schema. It is fatal for a batch (the loader exits with code 2).
//! - [`StorageError`] is what a row transaction can fail with. Its
//!   variants drive the coordinator's retry and escalation policy.

use std::path::PathBuf;
use thiserror::Error;

/// Database setup errors
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

    /// Invalid database path provided
    #[error("Invalid database path: {path}")]
    InvalidPath { path: PathBuf },

    /// Permission denied when accessing database
    #[error("Permission denied for database path: {path}")]
    PermissionDenied { path: PathBuf },

    /// Failed to create parent directory
    #[error("Failed to create parent directory for database: {0}")]
    DirectoryCreationFailed(#[from] std::io::Error),

    /// libsql operation error
    #[error("Database operation failed: {0}")]
    LibsqlError(#[from] libsql::Error),
}

impl DatabaseError {
    pub fn connection_failed(path: PathBuf, source: libsql::Error) -> Self {
        Self::ConnectionFailed { path, source }
    }

    pub fn initialization_failed(msg: impl Into<String>) -> Self {
        Self::InitializationFailed(msg.into())
    }

    pub fn invalid_path(path: PathBuf) -> Self {
        Self::InvalidPath { path }
    }

    pub fn permission_denied(path: PathBuf) -> Self {
        Self::PermissionDenied { path }
    }
}

/// Errors surfaced by a graph store during a row transaction
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The store connection dropped or could not be (re)opened
    #[error("Connection to graph store lost: {context}")]
    ConnectionLost { context: String },

    /// A uniqueness or referential constraint rejected a write
    #[error("Constraint violation: {context}")]
    ConstraintViolation { context: String },

    /// The store stayed locked, or the row transaction overran its deadline
    #[error("Timed out: {context}")]
    Timeout { context: String },

    /// Any other backend failure (bad SQL, corrupt row data, ...)
    #[error("Graph store error: {context}")]
    Backend { context: String },
}

impl StorageError {
    pub fn connection_lost(context: impl Into<String>) -> Self {
        Self::ConnectionLost {
            context: context.into(),
        }
    }

    pub fn constraint_violation(context: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            context: context.into(),
        }
    }

    pub fn timeout(context: impl Into<String>) -> Self {
        Self::Timeout {
            context: context.into(),
        }
    }

    pub fn backend(context: impl Into<String>) -> Self {
        Self::Backend {
            context: context.into(),
        }
    }

    /// Stable error code used in batch summaries
    pub fn kind(&self) -> &'static str {
        match self {
            StorageError::ConnectionLost { .. } => "ConnectionLost",
            StorageError::ConstraintViolation { .. } => "ConstraintViolation",
            StorageError::Timeout { .. } => "Timeout",
            StorageError::Backend { .. } => "StorageError",
        }
    }

    /// Whether re-running the whole row transaction may succeed
    ///
    /// Constraint violations are not retried here: the merge engines
    /// already re-fetch once after losing a create race.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StorageError::ConnectionLost { .. } | StorageError::Timeout { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, StorageError::Timeout { .. })
    }

    pub fn is_connection_lost(&self) -> bool {
        matches!(self, StorageError::ConnectionLost { .. })
    }

    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, StorageError::ConstraintViolation { .. })
    }

    /// Classify a libsql error raised while running `operation`
    ///
    /// Uses the primary SQLite result code when libsql exposes one and
    /// falls back to the error text otherwise.
    pub fn from_libsql(operation: &str, err: libsql::Error) -> Self {
        const SQLITE_BUSY: i32 = 5;
        const SQLITE_LOCKED: i32 = 6;
        const SQLITE_IOERR: i32 = 10;
        const SQLITE_CANTOPEN: i32 = 14;
        const SQLITE_CONSTRAINT: i32 = 19;

        let context = format!("{}: {}", operation, err);
        match &err {
            libsql::Error::SqliteFailure(code, _) => match (*code as i32) & 0xff {
                SQLITE_CONSTRAINT => Self::constraint_violation(context),
                SQLITE_BUSY | SQLITE_LOCKED => Self::timeout(context),
                SQLITE_IOERR | SQLITE_CANTOPEN => Self::connection_lost(context),
                _ => Self::classify_message(context),
            },
            libsql::Error::ConnectionFailed(_) => Self::connection_lost(context),
            _ => Self::classify_message(context),
        }
    }

    fn classify_message(context: String) -> Self {
        let lower = context.to_lowercase();
        if lower.contains("constraint failed") {
            Self::constraint_violation(context)
        } else if lower.contains("database is locked") || lower.contains("database is busy") {
            Self::timeout(context)
        } else if lower.contains("disk i/o error") || lower.contains("unable to open") {
            Self::connection_lost(context)
        } else {
            Self::backend(context)
        }
    }
}

impl From<DatabaseError> for StorageError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::LibsqlError(e) => StorageError::from_libsql("connect", e),
            other => StorageError::connection_lost(other.to_string()),
        }
    }
}
