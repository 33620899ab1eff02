//! Provgraph Core
//!
//! Idempotent graph-merge engine for provenance feeds. Each feed row names
//! a directed relationship between two typed entities; the engine turns
//! the row into create-or-reuse merges of both nodes and the edge, so the
//! same feed can be loaded any number of times, in any order, and
//! concurrently, without duplicating anything.
//!
//! # Architecture
//!
//! - **Store-owned graph**: no in-memory graph; every row is one
//!   transaction against a [`GraphStore`](db::GraphStore)
//! - **Constraint-backed uniqueness**: the store enforces one node per
//!   `(label, id)` and one edge per `(type, from, to, properties)`; the
//!   engine re-fetches after losing a create race
//! - **Never overwrite**: merges only fill attributes a node does not have
//! - **libsql**: embedded SQLite-compatible backend
//!
//! # Modules
//!
//! - [`models`] - rows, labels, graph records
//! - [`ingest`] - CSV row source and row normalizer
//! - [`services`] - label registry, merge engines, batch coordinator
//! - [`db`] - storage boundary traits and the libsql backend
//! - [`config`] - layered loader configuration

pub mod config;
pub mod db;
pub mod ingest;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use config::{ConfigError, LoaderConfig, RetryPolicy};
pub use db::{GraphDatabase, GraphStore, GraphTransaction, LibsqlGraphStore, StorageError};
pub use ingest::{normalize, CsvRowSource, NormalizationError, SourceError};
pub use models::*;
pub use services::*;
