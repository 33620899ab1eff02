//! LibsqlGraphStore - GraphStore Implementation for the libsql Backend
//!
//! Stores the provenance graph in two SQLite tables (see
//! [`GraphDatabase`](crate::db::GraphDatabase)) and maps each
//! [`GraphTransaction`] onto one `BEGIN IMMEDIATE` transaction on its own
//! connection.
//!
//! # Connection budget
//!
//! Connections are opened per transaction and bounded by a semaphore
//! (`max_connections`). The permit travels inside the transaction value, so
//! dropping the transaction (commit, rollback, error, timeout, cancelled
//! future) always gives the slot back.
//!
//! # Write lock
//!
//! SQLite admits one writer at a time and local libsql statements run on
//! the calling thread. Row transactions therefore queue on a single-permit
//! writer semaphore inside the process, and take the SQLite lock itself
//! with `BEGIN IMMEDIATE` on a connection without a busy handler, retrying
//! on `SQLITE_BUSY` with async sleeps until the database's busy timeout.
//! Every wait is an `.await`, so a caller's row timeout can always cut it
//! short and other rows keep running on the same executor thread.
//!
//! # Label policy
//!
//! Labels and relationship types are stored as plain column values, but the
//! store still insists on [`LabelSyntax::Identifier`] so the graph can be
//! exported verbatim to a Cypher-speaking store. Property keys written by
//! `set_attr_if_absent` follow the same rule since they are spliced into a
//! JSON path.

use crate::db::error::StorageError;
use crate::db::graph_store::{GraphStore, GraphTransaction};
use crate::db::GraphDatabase;
use crate::models::graph::is_blank;
use crate::models::{
    EdgeRecord, EdgeRef, GraphStats, Label, LabelSyntax, NodeRecord, NodeRef, Properties,
    RelationType,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use libsql::{Connection, Row};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

/// Pause between attempts to take a write lock held by another connection
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// GraphStore backed by an embedded libsql database
pub struct LibsqlGraphStore {
    db: Arc<GraphDatabase>,
    connections: Arc<Semaphore>,
    writer: Arc<Semaphore>,
}

/// Slots held for the lifetime of one row transaction
struct TransactionPermits {
    _writer: OwnedSemaphorePermit,
    _connection: OwnedSemaphorePermit,
}

impl LibsqlGraphStore {
    /// Wrap an opened database, allowing at most `max_connections` open transactions
    pub fn new(db: Arc<GraphDatabase>, max_connections: usize) -> Self {
        Self {
            db,
            connections: Arc::new(Semaphore::new(max_connections.max(1))),
            writer: Arc::new(Semaphore::new(1)),
        }
    }

    async fn permit(semaphore: &Arc<Semaphore>) -> Result<OwnedSemaphorePermit, StorageError> {
        semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StorageError::connection_lost("graph store is closed"))
    }

    /// Take the SQLite write lock, polling while another connection holds it
    async fn begin_immediate(&self, conn: &Connection) -> Result<(), StorageError> {
        let deadline = Instant::now() + self.db.busy_timeout();
        loop {
            // IMMEDIATE takes the write lock up front so a row transaction
            // never deadlocks upgrading from a read lock.
            match conn.execute("BEGIN IMMEDIATE", ()).await {
                Ok(_) => return Ok(()),
                Err(e) => {
                    let err = StorageError::from_libsql("begin transaction", e);
                    if !err.is_timeout() || Instant::now() >= deadline {
                        return Err(err);
                    }
                    tokio::time::sleep(LOCK_POLL_INTERVAL).await;
                }
            }
        }
    }

    /// Parse timestamp from database - handles both SQLite and RFC3339 formats
    fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StorageError> {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
            return Ok(naive.and_utc());
        }

        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(dt.with_timezone(&Utc));
        }

        Err(StorageError::backend(format!(
            "Unable to parse timestamp '{}' as SQLite or RFC3339 format",
            s
        )))
    }

    fn parse_properties(json: &str) -> Result<Properties, StorageError> {
        serde_json::from_str(json)
            .map_err(|e| StorageError::backend(format!("Failed to parse properties JSON: {}", e)))
    }

    /// Convert a row to a NodeRecord
    ///
    /// Expected columns: pk, label, entity_id, properties, created_at
    fn row_to_node(row: &Row) -> Result<NodeRecord, StorageError> {
        let column = |e: libsql::Error| StorageError::from_libsql("read entity row", e);
        let pk: i64 = row.get(0).map_err(column)?;
        let label: String = row.get(1).map_err(column)?;
        let id: i64 = row.get(2).map_err(column)?;
        let properties: String = row.get(3).map_err(column)?;
        let created_at: String = row.get(4).map_err(column)?;

        Ok(NodeRecord {
            node_ref: NodeRef::new(pk),
            label: Label::new_unchecked(label),
            id,
            properties: Self::parse_properties(&properties)?,
            created_at: Self::parse_timestamp(&created_at)?,
        })
    }

    /// Convert a row to an EdgeRecord
    ///
    /// Expected columns: pk, rel_type, from_pk, to_pk, properties, created_at
    fn row_to_edge(row: &Row) -> Result<EdgeRecord, StorageError> {
        let column = |e: libsql::Error| StorageError::from_libsql("read relationship row", e);
        let pk: i64 = row.get(0).map_err(column)?;
        let rel_type: String = row.get(1).map_err(column)?;
        let from: i64 = row.get(2).map_err(column)?;
        let to: i64 = row.get(3).map_err(column)?;
        let properties: String = row.get(4).map_err(column)?;
        let created_at: String = row.get(5).map_err(column)?;

        Ok(EdgeRecord {
            edge_ref: EdgeRef::new(pk),
            rel_type: RelationType::new_unchecked(rel_type),
            from: NodeRef::new(from),
            to: NodeRef::new(to),
            properties: Self::parse_properties(&properties)?,
            created_at: Self::parse_timestamp(&created_at)?,
        })
    }
}

#[async_trait]
impl GraphStore for LibsqlGraphStore {
    async fn begin(&self) -> Result<Box<dyn GraphTransaction>, StorageError> {
        let writer = Self::permit(&self.writer).await?;
        let connection = Self::permit(&self.connections).await?;
        let conn = self.db.connect_nowait().await?;

        self.begin_immediate(&conn).await?;

        Ok(Box::new(LibsqlTransaction {
            conn: Some(conn),
            permits: Some(TransactionPermits {
                _writer: writer,
                _connection: connection,
            }),
        }))
    }

    fn label_syntax(&self) -> LabelSyntax {
        LabelSyntax::Identifier
    }

    async fn stats(&self) -> Result<GraphStats, StorageError> {
        let _permit = Self::permit(&self.connections).await?;
        let conn = self.db.connect_with_timeout().await?;

        let mut rows = conn
            .query(
                "SELECT (SELECT COUNT(*) FROM entities), (SELECT COUNT(*) FROM relationships)",
                (),
            )
            .await
            .map_err(|e| StorageError::from_libsql("count graph", e))?;

        let row = rows
            .next()
            .await
            .map_err(|e| StorageError::from_libsql("count graph", e))?
            .ok_or_else(|| StorageError::backend("count graph returned no row"))?;

        let nodes: i64 = row
            .get(0)
            .map_err(|e| StorageError::from_libsql("count graph", e))?;
        let edges: i64 = row
            .get(1)
            .map_err(|e| StorageError::from_libsql("count graph", e))?;

        Ok(GraphStats {
            nodes: nodes.max(0) as u64,
            edges: edges.max(0) as u64,
        })
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.connections.close();
        self.writer.close();
        self.db.checkpoint().await?;
        Ok(())
    }
}

/// One `BEGIN IMMEDIATE` transaction on a dedicated connection
struct LibsqlTransaction {
    conn: Option<Connection>,
    permits: Option<TransactionPermits>,
}

impl LibsqlTransaction {
    fn conn(&self) -> Result<&Connection, StorageError> {
        self.conn
            .as_ref()
            .ok_or_else(|| StorageError::backend("transaction already finished"))
    }

    async fn query_one(
        &self,
        operation: &str,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Option<Row>, StorageError> {
        let mut rows = self
            .conn()?
            .query(sql, params)
            .await
            .map_err(|e| StorageError::from_libsql(operation, e))?;
        rows.next()
            .await
            .map_err(|e| StorageError::from_libsql(operation, e))
    }

    fn encode(properties: &Properties) -> Result<String, StorageError> {
        serde_json::to_string(properties)
            .map_err(|e| StorageError::backend(format!("Failed to serialize properties: {}", e)))
    }
}

#[async_trait]
impl GraphTransaction for LibsqlTransaction {
    async fn find_node(
        &mut self,
        label: &Label,
        id: i64,
    ) -> Result<Option<NodeRecord>, StorageError> {
        let row = self
            .query_one(
                "find node",
                "SELECT pk, label, entity_id, properties, created_at
                 FROM entities WHERE label = ?1 AND entity_id = ?2",
                (label.as_str(), id),
            )
            .await?;

        row.as_ref().map(LibsqlGraphStore::row_to_node).transpose()
    }

    async fn create_node(
        &mut self,
        label: &Label,
        id: i64,
        properties: &Properties,
    ) -> Result<NodeRecord, StorageError> {
        let properties_json = Self::encode(properties)?;

        let row = self
            .query_one(
                "create node",
                "INSERT INTO entities (label, entity_id, properties) VALUES (?1, ?2, ?3)
                 RETURNING pk, label, entity_id, properties, created_at",
                (label.as_str(), id, properties_json),
            )
            .await?
            .ok_or_else(|| StorageError::backend("create node returned no row"))?;

        LibsqlGraphStore::row_to_node(&row)
    }

    async fn set_attr_if_absent(
        &mut self,
        node: NodeRef,
        key: &str,
        value: &Value,
    ) -> Result<bool, StorageError> {
        LabelSyntax::Identifier
            .check(key)
            .map_err(|reason| StorageError::backend(format!("Invalid property key '{}': {}", key, reason)))?;

        let path = format!("$.{}", key);
        let value_json = serde_json::to_string(value)
            .map_err(|e| StorageError::backend(format!("Failed to serialize value: {}", e)))?;

        // A blank value only materialises a missing key; anything else may
        // also replace a stored null or empty string
        let sql = if is_blank(value) {
            "UPDATE entities
             SET properties = json_set(properties, ?1, json(?2)),
                 modified_at = CURRENT_TIMESTAMP
             WHERE pk = ?3
               AND json_type(properties, ?1) IS NULL"
        } else {
            "UPDATE entities
             SET properties = json_set(properties, ?1, json(?2)),
                 modified_at = CURRENT_TIMESTAMP
             WHERE pk = ?3
               AND (json_type(properties, ?1) IS NULL
                    OR json_type(properties, ?1) = 'null'
                    OR (json_type(properties, ?1) = 'text'
                        AND json_extract(properties, ?1) = ''))"
        };

        let changed = self
            .conn()?
            .execute(sql, (path, value_json, node.handle()))
            .await
            .map_err(|e| StorageError::from_libsql("set attribute", e))?;

        Ok(changed > 0)
    }

    async fn find_edge(
        &mut self,
        rel_type: &RelationType,
        from: NodeRef,
        to: NodeRef,
        properties: &Properties,
    ) -> Result<Option<EdgeRecord>, StorageError> {
        let match_key = Self::encode(properties)?;

        let row = self
            .query_one(
                "find relationship",
                "SELECT pk, rel_type, from_pk, to_pk, properties, created_at
                 FROM relationships
                 WHERE rel_type = ?1 AND from_pk = ?2 AND to_pk = ?3 AND match_key = ?4",
                (rel_type.as_str(), from.handle(), to.handle(), match_key),
            )
            .await?;

        row.as_ref().map(LibsqlGraphStore::row_to_edge).transpose()
    }

    async fn create_edge(
        &mut self,
        rel_type: &RelationType,
        from: NodeRef,
        to: NodeRef,
        properties: &Properties,
    ) -> Result<EdgeRecord, StorageError> {
        let match_key = Self::encode(properties)?;

        let row = self
            .query_one(
                "create relationship",
                "INSERT INTO relationships (rel_type, from_pk, to_pk, match_key, properties)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 RETURNING pk, rel_type, from_pk, to_pk, properties, created_at",
                (rel_type.as_str(), from.handle(), to.handle(), match_key),
            )
            .await?
            .ok_or_else(|| StorageError::backend("create relationship returned no row"))?;

        LibsqlGraphStore::row_to_edge(&row)
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let mut this = self;
        let conn = this
            .conn
            .take()
            .ok_or_else(|| StorageError::backend("transaction already finished"))?;

        if let Err(e) = conn.execute("COMMIT", ()).await {
            let _rollback = conn.execute("ROLLBACK", ()).await;
            return Err(StorageError::from_libsql("commit transaction", e));
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        let mut this = self;
        let conn = this
            .conn
            .take()
            .ok_or_else(|| StorageError::backend("transaction already finished"))?;

        conn.execute("ROLLBACK", ())
            .await
            .map_err(|e| StorageError::from_libsql("rollback transaction", e))?;
        Ok(())
    }
}

impl Drop for LibsqlTransaction {
    fn drop(&mut self) {
        // Dropped mid-flight (timeout or cancelled future): roll back on the
        // runtime and keep the writer and connection slots until that has happened.
        if let Some(conn) = self.conn.take() {
            let permits = self.permits.take();
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        if let Err(e) = conn.execute("ROLLBACK", ()).await {
                            tracing::debug!("Rollback of abandoned transaction failed: {}", e);
                        }
                        drop(permits);
                    });
                }
                Err(_) => {
                    tracing::warn!("Abandoned transaction outside a runtime; closing connection");
                }
            }
        }
    }
}
