//! Label Registry
//!
//! Turns the free-form type strings of a row into [`Label`] and
//! [`RelationType`] handles. Labels are schema-free by default: any
//! string the storage backend can hold is accepted. Deployments that know
//! their entity types ahead of time can close the set with
//! [`LabelRegistry::with_known`].

use crate::models::{
    Label, LabelSyntax, MergeRequest, RelationType, ResolvedRequest, DEFAULT_LABEL,
};
use crate::services::error::LabelError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Case rule applied to node labels before validation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelCase {
    /// Keep the label exactly as written (after trimming)
    #[default]
    Preserve,
    /// Upper-case the first character, lower-case the rest
    Capitalize,
}

impl LabelCase {
    pub fn apply(&self, label: &str) -> String {
        match self {
            LabelCase::Preserve => label.to_string(),
            LabelCase::Capitalize => {
                let mut chars = label.chars();
                match chars.next() {
                    Some(first) => first
                        .to_uppercase()
                        .chain(chars.flat_map(char::to_lowercase))
                        .collect(),
                    None => String::new(),
                }
            }
        }
    }
}

/// Resolves and validates labels for one storage backend
#[derive(Debug, Clone)]
pub struct LabelRegistry {
    syntax: LabelSyntax,
    case: LabelCase,
    known: Option<HashSet<String>>,
}

impl LabelRegistry {
    /// Open registry accepting any label valid under `syntax`
    pub fn new(syntax: LabelSyntax, case: LabelCase) -> Self {
        Self {
            syntax,
            case,
            known: None,
        }
    }

    /// Restrict node labels to `known`
    ///
    /// Entries get the same case rule as incoming labels. The default
    /// label is always part of the set, since rows without a `left_type`
    /// must still be loadable.
    pub fn with_known<I, S>(mut self, known: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set: HashSet<String> = known
            .into_iter()
            .map(|label| self.case.apply(label.as_ref().trim()))
            .collect();
        set.insert(DEFAULT_LABEL.to_string());
        self.known = Some(set);
        self
    }

    pub fn syntax(&self) -> LabelSyntax {
        self.syntax
    }

    /// Validate a node label
    pub fn resolve_label(&self, raw: &str) -> Result<Label, LabelError> {
        let candidate = self.case.apply(raw.trim());
        self.syntax
            .check(&candidate)
            .map_err(|reason| LabelError::invalid_syntax(&candidate, reason))?;

        if let Some(known) = &self.known {
            if !known.contains(&candidate) {
                return Err(LabelError::UnknownLabel { label: candidate });
            }
        }

        Ok(Label::new_unchecked(candidate))
    }

    /// Validate a relationship type token
    ///
    /// Types are never re-cased and are not subject to the closed set.
    pub fn resolve_relation_type(&self, raw: &str) -> Result<RelationType, LabelError> {
        let candidate = raw.trim();
        self.syntax
            .check(candidate)
            .map_err(|reason| LabelError::invalid_syntax(candidate, reason))?;
        Ok(RelationType::new_unchecked(candidate))
    }

    /// Resolve both labels and the relationship type of a request
    pub fn resolve_request(&self, request: &MergeRequest) -> Result<ResolvedRequest, LabelError> {
        Ok(ResolvedRequest {
            left_label: self.resolve_label(&request.left_label)?,
            left_id: request.left_id,
            left_concept: request.left_concept.clone(),
            right_label: self.resolve_label(&request.right_label)?,
            right_id: request.right_id,
            relation_type: self.resolve_relation_type(&request.relation_type)?,
            user_id: request.user_id,
        })
    }
}

impl Default for LabelRegistry {
    fn default() -> Self {
        Self::new(LabelSyntax::Identifier, LabelCase::Preserve)
    }
}
