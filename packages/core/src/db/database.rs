//! Database Connection Management
//!
//! Opens the embedded libsql (SQLite-compatible) database that backs the
//! provenance graph and creates its schema.
//!
//! # Architecture
//!
//! - **Path-agnostic**: Accepts any valid PathBuf; parent directories are created
//! - **Uniqueness in the schema**: `(label, entity_id)` and
//!   `(rel_type, from_pk, to_pk, match_key)` are UNIQUE, so the store
//!   itself guarantees at most one node / edge per key under concurrent writers
//! - **WAL mode**: Write-Ahead Logging for better concurrency
//! - **Foreign keys**: Edges cannot reference a missing node
//!
//! # Database Connection Patterns
//!
//! **ALWAYS use `connect_with_timeout()` in async functions.** It configures
//! the busy timeout and foreign keys on the fresh connection, so readers
//! wait out a checkpoint instead of failing immediately with `SQLITE_BUSY`.
//! Row transactions use `connect_nowait()` and poll for the write lock
//! themselves (see `LibsqlGraphStore`).
//!
//! ```no_run
//! # use provgraph_core::db::GraphDatabase;
//! # use std::path::PathBuf;
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let db = GraphDatabase::new(PathBuf::from("./data/provenance.db")).await?;
//! let conn = db.connect_with_timeout().await?;
//! # Ok(())
//! # }
//! ```

use crate::db::error::DatabaseError;
use libsql::{Builder, Database};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default SQLite busy timeout (5 seconds)
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Database service for the libsql-backed provenance graph
#[derive(Debug, Clone)]
pub struct GraphDatabase {
    /// libsql database handle (wrapped in Arc for sharing)
    pub db: Arc<Database>,

    /// Path to the database file
    pub db_path: PathBuf,

    busy_timeout: Duration,
}

impl GraphDatabase {
    /// Open (or create) the database at `db_path` with the default busy timeout
    ///
    /// This will:
    /// 1. Ensure the parent directory exists (create if needed)
    /// 2. Open/create the database file
    /// 3. Initialize the schema (CREATE TABLE IF NOT EXISTS)
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if:
    /// - Parent directory cannot be created
    /// - Database connection fails
    /// - Schema initialization fails
    pub async fn new(db_path: PathBuf) -> Result<Self, DatabaseError> {
        Self::with_busy_timeout(db_path, DEFAULT_BUSY_TIMEOUT).await
    }

    /// Open (or create) the database with a custom busy timeout
    pub async fn with_busy_timeout(
        db_path: PathBuf,
        busy_timeout: Duration,
    ) -> Result<Self, DatabaseError> {
        if db_path.as_os_str().is_empty() || db_path.is_dir() {
            return Err(DatabaseError::invalid_path(db_path));
        }

        let is_new_database = !db_path.exists();

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
            busy_timeout,
        };

        service.initialize_schema(is_new_database).await?;

        tracing::info!(
            path = %service.db_path.display(),
            new = is_new_database,
            "Graph database ready"
        );

        Ok(service)
    }

    /// Execute a PRAGMA statement
    ///
    /// PRAGMA statements return rows, so we must use query() instead of execute().
    async fn execute_pragma(
        &self,
        conn: &libsql::Connection,
        pragma: &str,
    ) -> Result<(), DatabaseError> {
        let mut stmt = conn.prepare(pragma).await.map_err(|e| {
            DatabaseError::initialization_failed(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        let _ = stmt.query(()).await.map_err(|e| {
            DatabaseError::initialization_failed(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        Ok(())
    }

    /// Initialize database schema and configuration
    ///
    /// Idempotent: safe to call against an existing database.
    ///
    /// # Schema
    ///
    /// - `entities`: one row per `(label, entity_id)` with JSON properties
    /// - `relationships`: one row per `(rel_type, from_pk, to_pk, match_key)`;
    ///   `match_key` is the key-sorted JSON of the match properties
    async fn initialize_schema(&self, is_new_database: bool) -> Result<(), DatabaseError> {
        let conn = self.connect_with_timeout().await?;

        self.execute_pragma(&conn, "PRAGMA journal_mode = WAL")
            .await?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS entities (
                pk INTEGER PRIMARY KEY AUTOINCREMENT,
                label TEXT NOT NULL,
                entity_id INTEGER NOT NULL,
                properties JSON NOT NULL DEFAULT '{}',
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                modified_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (label, entity_id)
            )",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::initialization_failed(format!("Failed to create entities table: {}", e))
        })?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS relationships (
                pk INTEGER PRIMARY KEY AUTOINCREMENT,
                rel_type TEXT NOT NULL,
                from_pk INTEGER NOT NULL,
                to_pk INTEGER NOT NULL,
                match_key TEXT NOT NULL,
                properties JSON NOT NULL DEFAULT '{}',
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (rel_type, from_pk, to_pk, match_key),
                FOREIGN KEY (from_pk) REFERENCES entities(pk),
                FOREIGN KEY (to_pk) REFERENCES entities(pk)
            )",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::initialization_failed(format!(
                "Failed to create relationships table: {}",
                e
            ))
        })?;

        // Reverse lookups (edges pointing at a node)
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_relationships_to ON relationships(to_pk)",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::initialization_failed(format!(
                "Failed to create index 'idx_relationships_to': {}",
                e
            ))
        })?;

        if is_new_database {
            self.execute_pragma(&conn, "PRAGMA wal_checkpoint(TRUNCATE)")
                .await?;
        }

        Ok(())
    }

    /// Get a synchronous connection to the database
    ///
    /// Only for single-threaded code that never holds the connection across
    /// an `.await`. The merge path uses `connect_with_timeout()` or `connect_nowait()`.
    pub fn connect(&self) -> Result<libsql::Connection, DatabaseError> {
        self.db.connect().map_err(DatabaseError::LibsqlError)
    }

    /// How long callers should keep trying for the write lock
    pub fn busy_timeout(&self) -> Duration {
        self.busy_timeout
    }

    /// Get an async connection with busy timeout and foreign keys configured
    pub async fn connect_with_timeout(&self) -> Result<libsql::Connection, DatabaseError> {
        self.connect_configured(self.busy_timeout).await
    }

    /// Get an async connection that reports `SQLITE_BUSY` immediately
    ///
    /// Local libsql statements run on the calling thread, so SQLite's busy
    /// handler would park the executor thread while it waits. Callers that
    /// need the write lock poll for it with async sleeps instead, which a
    /// surrounding `tokio::time::timeout` can cancel.
    pub async fn connect_nowait(&self) -> Result<libsql::Connection, DatabaseError> {
        self.connect_configured(Duration::ZERO).await
    }

    async fn connect_configured(
        &self,
        busy_timeout: Duration,
    ) -> Result<libsql::Connection, DatabaseError> {
        let conn = self.connect()?;

        self.execute_pragma(
            &conn,
            &format!("PRAGMA busy_timeout = {}", busy_timeout.as_millis()),
        )
        .await?;
        // foreign_keys is per-connection in SQLite
        self.execute_pragma(&conn, "PRAGMA foreign_keys = ON")
            .await?;

        Ok(conn)
    }

    /// Flush the WAL into the main database file
    pub async fn checkpoint(&self) -> Result<(), DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        self.execute_pragma(&conn, "PRAGMA wal_checkpoint(TRUNCATE)")
            .await
    }
}
