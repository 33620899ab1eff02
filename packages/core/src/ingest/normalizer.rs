//! Row Normalizer
//!
//! Pure transform from a [`RawRow`] to a [`MergeRequest`]:
//!
//! | field           | rule                                                      |
//! |-----------------|-----------------------------------------------------------|
//! | `left`, `right` | required integer, else `BadIdentifier`                    |
//! | `left_type`     | defaults to `"Default"` when missing or empty             |
//! | `right_type`    | required, else `MissingRequiredType`                      |
//! | `concept`       | defaults to `""`                                          |
//! | `relation_type` | required, else `MissingRelationType`                      |
//! | `user_id`       | integer if numeric, otherwise `1` (never an error)        |
//!
//! Surrounding whitespace is ignored everywhere. Label spelling is left
//! alone here; the label registry owns validation and case rules.

use crate::ingest::error::NormalizationError;
use crate::models::{MergeRequest, RawRow, DEFAULT_LABEL, DEFAULT_USER_ID};

/// Coerce one raw row into a merge request
pub fn normalize(raw: &RawRow) -> Result<MergeRequest, NormalizationError> {
    let left_id = parse_identifier("left", raw.left.as_deref())?;
    let right_id = parse_identifier("right", raw.right.as_deref())?;

    let left_label = non_empty(raw.left_type.as_deref())
        .unwrap_or(DEFAULT_LABEL)
        .to_string();
    let right_label = non_empty(raw.right_type.as_deref())
        .ok_or(NormalizationError::MissingRequiredType {
            field: "right_type",
        })?
        .to_string();

    let relation_type = non_empty(raw.relation_type.as_deref())
        .ok_or(NormalizationError::MissingRelationType)?
        .to_string();

    let left_concept = raw
        .concept
        .as_deref()
        .map(str::trim)
        .unwrap_or_default()
        .to_string();

    Ok(MergeRequest {
        left_label,
        left_id,
        left_concept,
        right_label,
        right_id,
        relation_type,
        user_id: coerce_user_id(raw.user_id.as_deref()),
    })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_identifier(field: &'static str, value: Option<&str>) -> Result<i64, NormalizationError> {
    let text = value.map(str::trim).unwrap_or_default();
    text.parse::<i64>()
        .map_err(|_| NormalizationError::bad_identifier(field, text))
}

/// Integer if the text is numeric, otherwise [`DEFAULT_USER_ID`]
///
/// Decimal input is truncated toward zero, matching an integer cast of a
/// numeric string; anything non-numeric or out of range falls back to the
/// default rather than failing the row.
fn coerce_user_id(value: Option<&str>) -> i64 {
    let Some(text) = non_empty(value) else {
        return DEFAULT_USER_ID;
    };

    if let Ok(id) = text.parse::<i64>() {
        return id;
    }

    match text.parse::<f64>() {
        Ok(f) if f.is_finite() && f >= i64::MIN as f64 && f < i64::MAX as f64 => f.trunc() as i64,
        _ => DEFAULT_USER_ID,
    }
}
