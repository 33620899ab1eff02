//! Row Data Structures
//!
//! A provenance feed row names a directed relationship between a "left"
//! and a "right" entity. Rows arrive as loosely-typed text ([`RawRow`]),
//! are coerced into a [`MergeRequest`] by the normalizer, and finally
//! have their labels resolved into a [`ResolvedRequest`] before any
//! storage work happens.

use crate::models::label::{Label, RelationType};
use serde::{Deserialize, Serialize};

/// `user_id` used when the row has none or it is not numeric
pub const DEFAULT_USER_ID: i64 = 1;

/// One record as read from the tabular feed
///
/// Every field is optional text. Column names follow the feed header:
/// `left`, `left_type`, `concept`, `right`, `right_type`,
/// `relation_type`, `user_id`. Unknown columns are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRow {
    #[serde(default)]
    pub left: Option<String>,
    #[serde(default)]
    pub left_type: Option<String>,
    #[serde(default)]
    pub concept: Option<String>,
    #[serde(default)]
    pub right: Option<String>,
    #[serde(default)]
    pub right_type: Option<String>,
    #[serde(default)]
    pub relation_type: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl RawRow {
    /// Convenience constructor for a fully-populated row
    pub fn new(
        left: &str,
        left_type: &str,
        concept: &str,
        right: &str,
        right_type: &str,
        relation_type: &str,
        user_id: &str,
    ) -> Self {
        Self {
            left: Some(left.to_string()),
            left_type: Some(left_type.to_string()),
            concept: Some(concept.to_string()),
            right: Some(right.to_string()),
            right_type: Some(right_type.to_string()),
            relation_type: Some(relation_type.to_string()),
            user_id: Some(user_id.to_string()),
        }
    }
}

/// A row handed to the batch coordinator, tagged with its source line
///
/// `record` is `Err` when the source could not decode the record at all;
/// the coordinator reports it as a row failure instead of dropping it.
#[derive(Debug, Clone)]
pub struct SourceRow {
    /// 1-based line of the record in its source (header is line 1 for CSV)
    pub line: u64,
    pub record: Result<RawRow, String>,
}

impl SourceRow {
    pub fn new(line: u64, row: RawRow) -> Self {
        Self {
            line,
            record: Ok(row),
        }
    }

    pub fn malformed(line: u64, message: impl Into<String>) -> Self {
        Self {
            line,
            record: Err(message.into()),
        }
    }
}

/// Canonical, type-coerced form of a single row
///
/// Ephemeral: produced by the normalizer and consumed immediately by the
/// batch coordinator. Labels are still raw strings at this stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequest {
    pub left_label: String,
    pub left_id: i64,
    pub left_concept: String,
    pub right_label: String,
    pub right_id: i64,
    pub relation_type: String,
    pub user_id: i64,
}

/// A [`MergeRequest`] whose labels and relationship type passed the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRequest {
    pub left_label: Label,
    pub left_id: i64,
    pub left_concept: String,
    pub right_label: Label,
    pub right_id: i64,
    pub relation_type: RelationType,
    pub user_id: i64,
}

impl ResolvedRequest {
    /// True when both ends of the relationship are the same entity
    pub fn is_self_loop(&self) -> bool {
        self.left_label == self.right_label && self.left_id == self.right_id
    }
}
