//! The Verification Engine: syntax validation of human-edited field values.
//!
//! Pure and stateless — a function from field + category to a pass/fail
//! result with a format-specific reason, callable before or after any edit
//! for immediate feedback. It never touches the session store; the service
//! facade decides what to do with the verdict.
//!
//! Date validation is deliberately lenient: `31.02.2026` passes. The filled
//! form is reviewed by humans, not consumed by a calendar engine, and a
//! receipt can genuinely carry a date the extraction mis-read — the reviewer
//! is the authority, the engine only enforces shape.

use crate::schema::{field_category, FieldCategory, FieldSet, Leg};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{2}\.\d{2}\.\d{4}$").expect("date regex"));
static TIME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{2}:\d{2}$").expect("time regex"));

/// One field value that failed validation. Non-fatal: surfaced per field so
/// the user can correct exactly the offending entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    pub leg: Leg,
    pub key: String,
    pub reason: String,
}

impl std::fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} / {}: {}", self.leg, self.key, self.reason)
    }
}

/// Validate a single value against its category's syntax rule.
///
/// Empty values (after trimming) are always valid: fields are optional
/// unless the external form enforces mandatoriness, which is not this
/// engine's concern.
pub fn validate_value(category: FieldCategory, value: &str) -> Result<(), String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(());
    }
    match category {
        FieldCategory::Date => {
            if DATE_RE.is_match(trimmed) {
                Ok(())
            } else {
                Err(format!(
                    "'{trimmed}' is not a valid date; use DD.MM.YYYY, e.g. 12.12.2024"
                ))
            }
        }
        FieldCategory::Time => {
            if TIME_RE.is_match(trimmed) {
                Ok(())
            } else {
                Err(format!(
                    "'{trimmed}' is not a valid time; use HH:MM with two digits each, e.g. 09:00"
                ))
            }
        }
        FieldCategory::Location => {
            if trimmed.chars().count() >= 2 {
                Ok(())
            } else {
                Err(format!("'{trimmed}' is too short for a location"))
            }
        }
        FieldCategory::Monetary | FieldCategory::FreeText => Ok(()),
    }
}

/// Validate every value of a leg's field set against the canonical catalog.
///
/// Keys outside the leg's catalog are rejected: the canonical schema is
/// closed, and a stray key would silently vanish later in the pipeline.
pub fn validate_set(leg: Leg, fields: &FieldSet) -> Vec<FieldViolation> {
    let mut violations = Vec::new();
    for (key, value) in fields {
        match field_category(leg, key) {
            Some(category) => {
                if let Err(reason) = validate_value(category, value) {
                    violations.push(FieldViolation {
                        leg,
                        key: key.clone(),
                        reason,
                    });
                }
            }
            None => violations.push(FieldViolation {
                leg,
                key: key.clone(),
                reason: format!("'{key}' is not a known field for the {leg} leg"),
            }),
        }
    }
    violations
}

/// Whether a full per-leg field-set collection is ready to proceed to
/// filling: true iff no value anywhere fails validation.
pub fn is_ready<'a>(sets: impl IntoIterator<Item = (Leg, &'a FieldSet)>) -> bool {
    sets.into_iter().all(|(leg, fields)| validate_set(leg, fields).is_empty())
}
