//! Data Structures
//!
//! - [`row`] - Raw tabular records and the normalized `MergeRequest`
//! - [`label`] - Validated node label and relationship type handles
//! - [`graph`] - Stored node and edge records returned by the graph store

pub mod graph;
pub mod label;
pub mod row;

pub use graph::{
    is_blank, EdgeRecord, EdgeRef, GraphStats, MergeOutcome, NodeRecord, NodeRef, Properties,
};
pub use label::{Label, LabelSyntax, RelationType, DEFAULT_LABEL, MAX_IDENTIFIER_LEN};
pub use row::{MergeRequest, RawRow, ResolvedRequest, SourceRow, DEFAULT_USER_ID};
