//! GraphStore Trait - Storage Boundary
//!
//! The merge engines only ever talk to the graph through these two traits.
//! A [`GraphStore`] hands out [`GraphTransaction`]s; everything a row does
//! (two node merges and one edge merge) runs inside one of them.
//!
//! # Guarantees a backend must provide
//!
//! 1. **At most one node per `(label, id)`** and **at most one edge per
//!    `(type, from, to, properties)`**, enforced by the store itself
//!    (typically a uniqueness constraint). Under a concurrent create the
//!    loser must fail with [`StorageError::ConstraintViolation`] so the
//!    engine can re-fetch the winner's record.
//! 2. **Atomicity**: writes made through a transaction become visible only
//!    on [`GraphTransaction::commit`]. A transaction that is rolled back,
//!    or simply dropped, leaves no trace.
//! 3. **Scoped resources**: whatever connection or permit a transaction
//!    holds is released when the transaction value is dropped, on every
//!    exit path.
//! 4. **Label policy**: [`GraphStore::label_syntax`] documents which labels
//!    and relationship types the backend can store safely.
//!
//! # Examples
//!
//! ```rust,no_run
//! use provgraph_core::db::{GraphDatabase, GraphStore, LibsqlGraphStore};
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let db = Arc::new(GraphDatabase::new(PathBuf::from("./data/provenance.db")).await?);
//!     let store: Arc<dyn GraphStore> = Arc::new(LibsqlGraphStore::new(db, 4));
//!
//!     let mut txn = store.begin().await?;
//!     // ... find_node / create_node / create_edge ...
//!     txn.commit().await?;
//!     Ok(())
//! }
//! ```

use crate::db::error::StorageError;
use crate::models::{
    EdgeRecord, GraphStats, Label, LabelSyntax, NodeRecord, NodeRef, Properties, RelationType,
};
use async_trait::async_trait;
use serde_json::Value;

/// Factory for row transactions against a property-graph store
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Open a write transaction
    ///
    /// May wait for a connection or the write lock to become available;
    /// implementations must wait by awaiting, so the caller's timeout can
    /// cancel the wait. Fails with `ConnectionLost` if no connection can be
    /// opened and `Timeout` if the store stays locked.
    async fn begin(&self) -> Result<Box<dyn GraphTransaction>, StorageError>;

    /// Identifier rules for labels and relationship types on this backend
    fn label_syntax(&self) -> LabelSyntax;

    /// Current node and edge totals
    async fn stats(&self) -> Result<GraphStats, StorageError>;

    /// Flush and release backend resources
    async fn close(&self) -> Result<(), StorageError>;
}

/// One open write transaction
#[async_trait]
pub trait GraphTransaction: Send {
    /// Look up the node keyed by `(label, id)`
    async fn find_node(&mut self, label: &Label, id: i64)
        -> Result<Option<NodeRecord>, StorageError>;

    /// Create the node keyed by `(label, id)` with `properties`
    ///
    /// Fails with `ConstraintViolation` if the key already exists.
    async fn create_node(
        &mut self,
        label: &Label,
        id: i64,
        properties: &Properties,
    ) -> Result<NodeRecord, StorageError>;

    /// Set `key` on `node` only if the node has no value for it yet
    ///
    /// Missing, null and empty-string values count as unset. A blank
    /// `value` (null or empty string) is only written when `key` is missing
    /// altogether, so it never replaces anything. Returns whether the value
    /// was written.
    async fn set_attr_if_absent(
        &mut self,
        node: NodeRef,
        key: &str,
        value: &Value,
    ) -> Result<bool, StorageError>;

    /// Look up the `rel_type` edge `from -> to` whose properties equal `properties`
    async fn find_edge(
        &mut self,
        rel_type: &RelationType,
        from: NodeRef,
        to: NodeRef,
        properties: &Properties,
    ) -> Result<Option<EdgeRecord>, StorageError>;

    /// Create a `rel_type` edge `from -> to` carrying exactly `properties`
    ///
    /// Fails with `ConstraintViolation` if an identical edge exists.
    async fn create_edge(
        &mut self,
        rel_type: &RelationType,
        from: NodeRef,
        to: NodeRef,
        properties: &Properties,
    ) -> Result<EdgeRecord, StorageError>;

    /// Make every write of this transaction visible
    async fn commit(self: Box<Self>) -> Result<(), StorageError>;

    /// Discard every write of this transaction
    async fn rollback(self: Box<Self>) -> Result<(), StorageError>;
}
