//! Shared types for the ingestion pipeline.

use serde::{Deserialize, Serialize};

// ─── Collection ──────────────────────────────────────────────────────────────

/// The fixed set of domain collections this indexer consumes.
///
/// Anything outside this set is rejected at the filter boundary — unknown
/// collections are never partially trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Scene,
    Event,
    Post,
    Alliance,
}

impl Collection {
    /// The namespaced record type (NSID) on the wire.
    pub fn nsid(&self) -> &'static str {
        match self {
            Self::Scene => "app.gather.scene",
            Self::Event => "app.gather.event",
            Self::Post => "app.gather.post",
            Self::Alliance => "app.gather.alliance",
        }
    }

    /// Parse an NSID into a known collection. Returns `None` for anything
    /// outside the allow-list.
    pub fn from_nsid(nsid: &str) -> Option<Self> {
        match nsid {
            "app.gather.scene" => Some(Self::Scene),
            "app.gather.event" => Some(Self::Event),
            "app.gather.post" => Some(Self::Post),
            "app.gather.alliance" => Some(Self::Alliance),
            _ => None,
        }
    }

    /// All allow-listed collections.
    pub fn all() -> [Collection; 4] {
        [Self::Scene, Self::Event, Self::Post, Self::Alliance]
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.nsid())
    }
}

// ─── CommitOp ────────────────────────────────────────────────────────────────

/// The operation carried by a commit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitOp {
    Create,
    Update,
    Delete,
}

impl CommitOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

// ─── CommitEvent ─────────────────────────────────────────────────────────────

/// A single create/update/delete on one record in an upstream repository.
///
/// `seq` is the microsecond-resolution sequence value used as the resume
/// cursor. It increases within one connector session but may repeat or
/// overlap across reconnects — it is a high-water mark for resume
/// positioning, never a uniqueness guarantee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitEvent {
    /// Stable identity of the record's authoring repository (DID).
    pub owner: String,
    /// Sequence value (microseconds since epoch at the upstream).
    pub seq: u64,
    /// Collection NSID as received on the wire (may be outside the allow-list).
    pub collection: String,
    /// Record key within (owner, collection).
    pub rkey: String,
    /// Revision token identifying this version of the record.
    pub rev: String,
    /// The operation.
    pub operation: CommitOp,
    /// Decoded record payload; `None` for deletes.
    pub record: Option<serde_json::Value>,
}

impl CommitEvent {
    /// The allow-listed collection, if this event's collection is known.
    pub fn known_collection(&self) -> Option<Collection> {
        Collection::from_nsid(&self.collection)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_nsid_roundtrip() {
        for c in Collection::all() {
            assert_eq!(Collection::from_nsid(c.nsid()), Some(c));
        }
    }

    #[test]
    fn unknown_nsid_rejected() {
        assert_eq!(Collection::from_nsid("app.bsky.feed.post"), None);
        assert_eq!(Collection::from_nsid(""), None);
    }

    #[test]
    fn known_collection_on_event() {
        let ev = CommitEvent {
            owner: "did:plc:abc".into(),
            seq: 1,
            collection: "app.gather.post".into(),
            rkey: "3k".into(),
            rev: "aa".into(),
            operation: CommitOp::Create,
            record: None,
        };
        assert_eq!(ev.known_collection(), Some(Collection::Post));
    }
}
