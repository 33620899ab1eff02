//! Stored Graph Records
//!
//! Records handed back by a [`GraphTransaction`](crate::db::GraphTransaction).
//! The engine never keeps these around beyond a single row transaction;
//! the store owns the graph.

use crate::models::label::{Label, RelationType};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Property map of a node or edge
///
/// A `BTreeMap` so serialization is key-ordered, which is what makes the
/// JSON form usable as an identity key for edge match properties.
pub type Properties = BTreeMap<String, Value>;

/// Opaque store handle for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct NodeRef(i64);

impl NodeRef {
    pub fn new(handle: i64) -> Self {
        Self(handle)
    }

    pub fn handle(&self) -> i64 {
        self.0
    }
}

/// Opaque store handle for an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct EdgeRef(i64);

impl EdgeRef {
    pub fn new(handle: i64) -> Self {
        Self(handle)
    }

    pub fn handle(&self) -> i64 {
        self.0
    }
}

/// A node as stored, keyed by `(label, id)`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeRecord {
    pub node_ref: NodeRef,
    pub label: Label,
    pub id: i64,
    pub properties: Properties,
    pub created_at: DateTime<Utc>,
}

impl NodeRecord {
    /// Whether `key` counts as unset for merge purposes
    ///
    /// Missing keys, JSON null and empty strings are all absent, so a blank
    /// default stored by an earlier row can still be filled in later.
    pub fn attribute_absent(&self, key: &str) -> bool {
        self.properties.get(key).map_or(true, is_blank)
    }
}

/// A directed edge as stored, keyed by `(type, from, to, properties)`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EdgeRecord {
    pub edge_ref: EdgeRef,
    pub rel_type: RelationType,
    pub from: NodeRef,
    pub to: NodeRef,
    pub properties: Properties,
    pub created_at: DateTime<Utc>,
}

/// Whether a merge created a new record or matched an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeOutcome {
    Created,
    Reused,
}

/// Node and edge totals reported by a store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub nodes: u64,
    pub edges: u64,
}

/// True for values that never overwrite and never count as "set"
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}
