//! Record filter — allow-list plus minimal shape validation.
//!
//! The filter sits between the decoder and the mapper. It accepts only
//! the fixed set of known collections whose payload carries the fields
//! the mapper requires, and rejects everything else with a reason code.
//! Rejects are counted, never retried.
//!
//! Contract with the mapper: a record accepted here must never be
//! rejected by the mapper for a required-field reason. The shape checks
//! below and the mapper's field extraction must agree.

use serde_json::Value;

use crate::types::{Collection, CommitEvent, CommitOp};

// ─── RejectReason ────────────────────────────────────────────────────────────

/// Why a commit event was rejected by the filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The collection is outside the allow-list.
    WrongCollection,
    /// A required field is missing or has the wrong JSON type.
    MissingField { field: &'static str },
    /// A post references both a scene and an event parent, or neither.
    InvalidReference,
}

impl RejectReason {
    /// Stable code for metric labels.
    pub fn code(&self) -> &'static str {
        match self {
            Self::WrongCollection => "wrong_collection",
            Self::MissingField { .. } => "missing_field",
            Self::InvalidReference => "invalid_reference",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WrongCollection => write!(f, "collection not in allow-list"),
            Self::MissingField { field } => write!(f, "missing required field '{field}'"),
            Self::InvalidReference => {
                write!(f, "post must reference exactly one of scene or event")
            }
        }
    }
}

// ─── RecordFilter ────────────────────────────────────────────────────────────

/// Accepts commit events for known collections with a mappable shape.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter;

impl RecordFilter {
    pub fn new() -> Self {
        Self
    }

    /// Check a commit event. `Ok(collection)` means the mapper (or, for
    /// deletes, the repository) can take it from here.
    pub fn check(&self, event: &CommitEvent) -> Result<Collection, RejectReason> {
        let collection = event
            .known_collection()
            .ok_or(RejectReason::WrongCollection)?;

        // Deletes carry no payload; the key alone identifies the target.
        if event.operation == CommitOp::Delete {
            return Ok(collection);
        }

        let record = match &event.record {
            Some(record @ Value::Object(_)) => record,
            _ => return Err(RejectReason::MissingField { field: "record" }),
        };

        match collection {
            Collection::Scene | Collection::Event | Collection::Alliance => {
                require_text(record, "name")?;
            }
            Collection::Post => {
                require_text(record, "text")?;
                check_post_reference(record)?;
            }
        }

        Ok(collection)
    }
}

/// Require a non-empty string field.
fn require_text(record: &Value, field: &'static str) -> Result<(), RejectReason> {
    match record.get(field).and_then(Value::as_str) {
        Some(s) if !s.trim().is_empty() => Ok(()),
        _ => Err(RejectReason::MissingField { field }),
    }
}

/// A post is valid referencing either a scene parent or an event parent,
/// not both — and not neither.
fn check_post_reference(record: &Value) -> Result<(), RejectReason> {
    let has_scene = matches!(record.get("scene").and_then(Value::as_str), Some(s) if !s.is_empty());
    let has_event = matches!(record.get("event").and_then(Value::as_str), Some(s) if !s.is_empty());
    if has_scene ^ has_event {
        Ok(())
    } else {
        Err(RejectReason::InvalidReference)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
