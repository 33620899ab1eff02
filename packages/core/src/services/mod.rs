//! Merge Services
//!
//! The merge pipeline on top of the storage boundary:
//!
//! - `LabelRegistry` - validating dynamic labels and relationship types
//! - `merge_node` - create-or-reuse of a node keyed by `(label, id)`
//! - `merge_relationship` - create-or-reuse of a directed, typed edge
//! - `BatchCoordinator` - per-row transactions, retries, escalation, reporting
//!
//! Services never hold graph state; every merge runs inside a
//! `GraphTransaction` handed to it by the coordinator.

pub mod batch_coordinator;
pub mod error;
pub mod label_registry;
pub mod node_merge;
pub mod relationship_merge;

pub use batch_coordinator::{
    AbortReason, BatchCoordinator, BatchOptions, BatchReport, CancelSignal, RowFailure,
    CONCEPT_ATTR, USER_ID_ATTR,
};
pub use error::{LabelError, MergeError};
pub use label_registry::{LabelCase, LabelRegistry};
pub use node_merge::{merge_node, NodeMerge};
pub use relationship_merge::{merge_relationship, EdgeMerge};
