//! Service Layer Error Types
//!
//! Row-level failures of the merge pipeline. None of these abort a batch
//! on their own; the coordinator records them against the row's source
//! line and decides about escalation.

use crate::db::StorageError;
use crate::ingest::NormalizationError;
use thiserror::Error;

/// Label or relationship type rejected by the registry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LabelError {
    /// Not storable under the backend's identifier policy
    #[error("Invalid label '{label}': {reason}")]
    InvalidLabelSyntax { label: String, reason: String },

    /// Outside the configured closed label set
    #[error("Unknown label '{label}'")]
    UnknownLabel { label: String },
}

impl LabelError {
    pub fn invalid_syntax(label: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidLabelSyntax {
            label: label.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LabelError::InvalidLabelSyntax { .. } => "InvalidLabelSyntax",
            LabelError::UnknownLabel { .. } => "UnknownLabel",
        }
    }
}

/// Why a single row failed
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MergeError {
    #[error(transparent)]
    Normalization(#[from] NormalizationError),

    #[error(transparent)]
    Label(#[from] LabelError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The source could not decode the record at all
    #[error("Malformed record: {0}")]
    MalformedRecord(String),
}

impl MergeError {
    /// Stable error code used in batch reports
    pub fn kind(&self) -> &'static str {
        match self {
            MergeError::Normalization(e) => e.kind(),
            MergeError::Label(e) => e.kind(),
            MergeError::Storage(e) => e.kind(),
            MergeError::MalformedRecord(_) => "MalformedRecord",
        }
    }

    pub fn is_connection_lost(&self) -> bool {
        matches!(self, MergeError::Storage(e) if e.is_connection_lost())
    }
}
