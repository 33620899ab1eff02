//! Database Layer
//!
//! The storage boundary of the merge engine and its libsql backend:
//!
//! - [`GraphStore`] / [`GraphTransaction`] - the traits every backend implements
//! - [`GraphDatabase`] - opening the libsql file and creating the schema
//! - [`LibsqlGraphStore`] - the libsql implementation of the traits
//!
//! # Architecture
//!
//! The engine holds no graph in memory. Each row runs as one transaction
//! against the store, and the store's own uniqueness constraints are what
//! keep concurrent upserts from producing duplicate nodes or edges.

mod database;
mod error;
mod graph_store;
mod libsql_store;

pub use database::{GraphDatabase, DEFAULT_BUSY_TIMEOUT};
pub use error::{DatabaseError, StorageError};
pub use graph_store::{GraphStore, GraphTransaction};
pub use libsql_store::LibsqlGraphStore;
