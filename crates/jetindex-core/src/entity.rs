//! Normalized domain entities and the idempotency key.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::Collection;

// ─── Location ────────────────────────────────────────────────────────────────

/// A location after the privacy policy has been applied.
///
/// Which fields are populated depends on the record's consent level:
/// precise keeps coordinates plus a fine geohash, coarse keeps only a
/// truncated geohash, and no consent keeps only the free-text label.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geohash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Location {
    /// Returns `true` if this location carries precise coordinates.
    pub fn has_coordinates(&self) -> bool {
        self.latitude.is_some() || self.longitude.is_some()
    }
}

// ─── Entity bodies ───────────────────────────────────────────────────────────

/// A recurring community or venue that hosts events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

/// A scheduled gathering, optionally attached to a scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub starts_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<i64>,
    /// AT-URI of the parent scene, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scene: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

/// A short text post attached to a scene **or** an event, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scene: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
}

/// A federation of scenes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alliance {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<String>,
}

/// The collection-tagged entity payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EntityBody {
    Scene(Scene),
    Event(Event),
    Post(Post),
    Alliance(Alliance),
}

impl EntityBody {
    pub fn collection(&self) -> Collection {
        match self {
            Self::Scene(_) => Collection::Scene,
            Self::Event(_) => Collection::Event,
            Self::Post(_) => Collection::Post,
            Self::Alliance(_) => Collection::Alliance,
        }
    }
}

// ─── DomainEntity ────────────────────────────────────────────────────────────

/// A normalized entity keyed by (owner, collection, rkey).
///
/// Each revision supersedes the prior one for that key — revisions are
/// never merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEntity {
    pub owner: String,
    pub collection: Collection,
    pub rkey: String,
    pub rev: String,
    pub body: EntityBody,
}

impl DomainEntity {
    /// The idempotency key identifying this exact (record, revision) pair.
    pub fn idempotency_key(&self) -> IdempotencyKey {
        IdempotencyKey::derive(&self.owner, self.collection, &self.rkey, &self.rev)
    }
}

// ─── IdempotencyKey ──────────────────────────────────────────────────────────

/// Deterministic hash over (owner, collection, rkey, rev).
///
/// Reprocessing the same key is a no-op at the repository — this is what
/// converts at-least-once delivery into effectively-once storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Derive the key from its components. Fields are separated by a NUL
    /// byte so no concatenation of distinct inputs can collide.
    pub fn derive(owner: &str, collection: Collection, rkey: &str, rev: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(owner.as_bytes());
        hasher.update([0]);
        hasher.update(collection.nsid().as_bytes());
        hasher.update([0]);
        hasher.update(rkey.as_bytes());
        hasher.update([0]);
        hasher.update(rev.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_key_deterministic() {
        let a = IdempotencyKey::derive("did:plc:abc", Collection::Post, "3k", "rev1");
        let b = IdempotencyKey::derive("did:plc:abc", Collection::Post, "3k", "rev1");
        assert_eq!(a, b);
    }

    #[test]
    fn idempotency_key_varies_per_component() {
        let base = IdempotencyKey::derive("did:plc:abc", Collection::Post, "3k", "rev1");
        assert_ne!(
            base,
            IdempotencyKey::derive("did:plc:xyz", Collection::Post, "3k", "rev1")
        );
        assert_ne!(
            base,
            IdempotencyKey::derive("did:plc:abc", Collection::Scene, "3k", "rev1")
        );
        assert_ne!(
            base,
            IdempotencyKey::derive("did:plc:abc", Collection::Post, "3j", "rev1")
        );
        assert_ne!(
            base,
            IdempotencyKey::derive("did:plc:abc", Collection::Post, "3k", "rev2")
        );
    }

    #[test]
    fn idempotency_key_no_concat_collision() {
        // "ab" + "c" vs "a" + "bc" must hash differently
        let a = IdempotencyKey::derive("ab", Collection::Post, "c", "r");
        let b = IdempotencyKey::derive("a", Collection::Post, "bc", "r");
        assert_ne!(a, b);
    }

    #[test]
    fn body_collection_tag() {
        let body = EntityBody::Post(Post {
            text: "hello".into(),
            scene: Some("at://did:plc:abc/app.gather.scene/1".into()),
            event: None,
        });
        assert_eq!(body.collection(), Collection::Post);
    }

    #[test]
    fn body_json_roundtrip() {
        let body = EntityBody::Scene(Scene {
            name: "Warehouse".into(),
            summary: None,
            location: Some(Location {
                latitude: None,
                longitude: None,
                geohash: Some("u4pru".into()),
                label: Some("Somewhere".into()),
            }),
        });
        let json = serde_json::to_string(&body).unwrap();
        let back: EntityBody = serde_json::from_str(&json).unwrap();
        assert_eq!(back, body);
    }
}
