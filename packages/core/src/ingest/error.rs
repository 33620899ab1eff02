//! Ingest Error Types

use std::path::PathBuf;
use thiserror::Error;

/// Row-level coercion failures raised by the normalizer
///
/// Never fatal for a batch: the coordinator records them against the row's
/// source line and moves on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizationError {
    /// `left` / `right` missing, empty, or not an integer
    #[error("Field '{field}' is not an integer identifier: '{value}'")]
    BadIdentifier { field: &'static str, value: String },

    /// `right_type` missing or empty (it has no default)
    #[error("Required type field '{field}' is missing or empty")]
    MissingRequiredType { field: &'static str },

    /// `relation_type` missing or empty
    #[error("Field 'relation_type' is missing or empty")]
    MissingRelationType,
}

impl NormalizationError {
    pub fn bad_identifier(field: &'static str, value: impl Into<String>) -> Self {
        Self::BadIdentifier {
            field,
            value: value.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            NormalizationError::BadIdentifier { .. } => "BadIdentifier",
            NormalizationError::MissingRequiredType { .. } => "MissingRequiredType",
            NormalizationError::MissingRelationType => "MissingRelationType",
        }
    }
}

/// Failures opening or reading a row source as a whole
///
/// Unlike row errors these stop the load before it starts (exit code 2).
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to open source {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to read source header: {0}")]
    Header(#[from] csv::Error),
}
