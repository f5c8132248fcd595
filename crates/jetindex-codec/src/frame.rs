//! Frame → commit event extraction.
//!
//! A frame is a single CBOR map. Commit frames carry the repository
//! change itself; other frame kinds (identity churn, account status)
//! are surfaced as [`Frame::Ignored`] so the pipeline can skip them
//! without treating them as decode failures.

use jetindex_core::types::{CommitEvent, CommitOp};

use crate::error::DecodeError;
use crate::value::{decode_value, Value};

/// A decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A repository commit: create/update/delete of one record.
    Commit(CommitEvent),
    /// A structurally valid frame of a kind this indexer does not
    /// consume.
    Ignored { kind: String },
}

/// Decode a raw binary frame.
pub fn decode_frame(input: &[u8]) -> Result<Frame, DecodeError> {
    let root = decode_value(input)?;

    let kind = root
        .get("kind")
        .and_then(Value::as_text)
        .ok_or(DecodeError::MissingField { field: "kind" })?;

    if kind != "commit" {
        return Ok(Frame::Ignored {
            kind: kind.to_string(),
        });
    }

    let owner = required_text(&root, "did")?;
    let seq = root
        .get("seq")
        .and_then(Value::as_unsigned)
        .ok_or(DecodeError::MissingField { field: "seq" })?;

    let commit = root
        .get("commit")
        .ok_or(DecodeError::MissingField { field: "commit" })?;
    if !matches!(commit, Value::Map(_)) {
        return Err(DecodeError::InvalidField {
            field: "commit",
            reason: "not a map".into(),
        });
    }

    let operation = match required_text(commit, "operation")?.as_str() {
        "create" => CommitOp::Create,
        "update" => CommitOp::Update,
        "delete" => CommitOp::Delete,
        other => {
            return Err(DecodeError::InvalidField {
                field: "operation",
                reason: format!("unknown operation '{other}'"),
            })
        }
    };

    let record = match commit.get("record") {
        Some(Value::Null) | None => None,
        Some(value) => Some(value.to_json()),
    };

    if operation != CommitOp::Delete && record.is_none() {
        return Err(DecodeError::MissingField { field: "record" });
    }

    Ok(Frame::Commit(CommitEvent {
        owner,
        seq,
        collection: required_text(commit, "collection")?,
        rkey: required_text(commit, "rkey")?,
        rev: required_text(commit, "rev")?,
        operation,
        record,
    }))
}

fn required_text(map: &Value, field: &'static str) -> Result<String, DecodeError> {
    map.get(field)
        .and_then(Value::as_text)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .ok_or(DecodeError::MissingField { field })
}

// ─── Tests ────────────────────────────────────────────────────────────────────
