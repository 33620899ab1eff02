//! Label and Relationship Type Handles
//!
//! Node labels and relationship types are schema-free: any row may
//! introduce a new one. They are never reflected into Rust types; instead
//! they live in validated string handles that can only be produced by the
//! label registry (or by a storage backend reading back what it stored).

use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::OnceLock;

/// Label assigned to a left entity whose row has no `left_type`
pub const DEFAULT_LABEL: &str = "Default";

/// Longest identifier accepted under [`LabelSyntax::Identifier`]
pub const MAX_IDENTIFIER_LEN: usize = 128;

// Regex pattern for property-graph identifiers (labels, types, property keys)
const IDENTIFIER_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_]*$";

// IDENTIFIER_PATTERN is a constant, so compiling it cannot fail at runtime
fn identifier_regex() -> &'static Regex {
    static IDENTIFIER_REGEX: OnceLock<Regex> = OnceLock::new();
    IDENTIFIER_REGEX.get_or_init(|| Regex::new(IDENTIFIER_PATTERN).expect("valid identifier pattern"))
}

/// Identifier rules a storage backend imposes on labels and types
///
/// The policy is owned by the storage boundary; the registry only
/// enforces whichever policy the store reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelSyntax {
    /// Property-graph identifier: `[A-Za-z_][A-Za-z0-9_]*`, at most 128 chars
    Identifier,
    /// Any non-empty string without control characters
    Printable,
}

impl LabelSyntax {
    /// Check `candidate` against this policy, returning the reason on failure
    pub fn check(&self, candidate: &str) -> Result<(), String> {
        if candidate.is_empty() {
            return Err("label is empty".to_string());
        }

        match self {
            LabelSyntax::Identifier => {
                if candidate.len() > MAX_IDENTIFIER_LEN {
                    return Err(format!(
                        "longer than {} characters",
                        MAX_IDENTIFIER_LEN
                    ));
                }
                if identifier_regex().is_match(candidate) {
                    Ok(())
                } else {
                    Err("must match [A-Za-z_][A-Za-z0-9_]*".to_string())
                }
            }
            LabelSyntax::Printable => {
                if candidate.chars().any(char::is_control) {
                    Err("contains control characters".to_string())
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// Validated node label
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Label(String);

impl Label {
    /// Wrap a string that has already been validated
    ///
    /// Only the registry and storage backends reading their own rows
    /// should call this.
    pub(crate) fn new_unchecked(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validated relationship type token
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct RelationType(String);

impl RelationType {
    pub(crate) fn new_unchecked(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
