//! Entity mapper — commit record → normalized domain entity.
//!
//! The mapper is a pure, deterministic transform. It runs after the
//! filter, so required fields are already known to exist; its own error
//! cases are the ones the filter cannot see (malformed locations,
//! disallowed labels). The privacy policy is applied here, before
//! anything reaches storage: a record whose consent disallows precise
//! location never yields an entity carrying precise coordinates.

use serde_json::Value;
use thiserror::Error;

use crate::entity::{Alliance, DomainEntity, EntityBody, Event, Location, Post, Scene};
use crate::types::{Collection, CommitEvent};

/// Geohash length stored when the record consents to precise location.
const GEOHASH_PRECISE_LEN: usize = 9;
/// Geohash length stored when the record requests coarse location.
const GEOHASH_COARSE_LEN: usize = 5;

/// Self-labels that exclude a record from indexing entirely.
const DISALLOWED_LABELS: &[&str] = &["!hide", "!takedown"];

// ─── MapError ────────────────────────────────────────────────────────────────

/// Errors that can occur while mapping a filtered record.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MapError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("post references neither a scene nor an event parent")]
    MissingReference,

    #[error("malformed location: {reason}")]
    MalformedLocation { reason: String },

    #[error("record carries disallowed label '{label}'")]
    DisallowedLabel { label: String },

    #[error("unmapped collection: {nsid}")]
    UnknownCollection { nsid: String },
}

// ─── Location consent ────────────────────────────────────────────────────────

/// Consent level for storing a record's location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LocationConsent {
    Precise,
    Coarse,
    None,
}

impl LocationConsent {
    /// A missing or unrecognized consent value never grants precision.
    fn parse(value: Option<&str>) -> Self {
        match value {
            Some("precise") => Self::Precise,
            Some("coarse") => Self::Coarse,
            _ => Self::None,
        }
    }
}

// ─── EntityMapper ────────────────────────────────────────────────────────────

/// Maps a filtered commit event to exactly one domain entity variant.
#[derive(Debug, Clone, Default)]
pub struct EntityMapper;

impl EntityMapper {
    pub fn new() -> Self {
        Self
    }

    /// Map a create/update commit into a domain entity.
    ///
    /// The caller routes deletes straight to the repository; they carry
    /// no record to map.
    pub fn map(&self, event: &CommitEvent) -> Result<DomainEntity, MapError> {
        let collection = event
            .known_collection()
            .ok_or_else(|| MapError::UnknownCollection {
                nsid: event.collection.clone(),
            })?;
        let record = event
            .record
            .as_ref()
            .ok_or(MapError::MissingField { field: "record" })?;

        check_labels(record)?;

        let body = match collection {
            Collection::Scene => EntityBody::Scene(Scene {
                name: text_field(record, "name")?,
                summary: optional_text(record, "summary"),
                location: map_location(record.get("location"))?,
            }),
            Collection::Event => EntityBody::Event(Event {
                name: text_field(record, "name")?,
                starts_at: record.get("startsAt").and_then(Value::as_i64),
                ends_at: record.get("endsAt").and_then(Value::as_i64),
                scene: optional_text(record, "scene"),
                location: map_location(record.get("location"))?,
            }),
            Collection::Post => {
                let scene = optional_text(record, "scene");
                let event_ref = optional_text(record, "event");
                if scene.is_none() && event_ref.is_none() {
                    return Err(MapError::MissingReference);
                }
                EntityBody::Post(Post {
                    text: text_field(record, "text")?,
                    scene,
                    event: event_ref,
                })
            }
            Collection::Alliance => EntityBody::Alliance(Alliance {
                name: text_field(record, "name")?,
                summary: optional_text(record, "summary"),
                members: record
                    .get("members")
                    .and_then(Value::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(|v| v.as_str().map(String::from))
                            .collect()
                    })
                    .unwrap_or_default(),
            }),
        };

        Ok(DomainEntity {
            owner: event.owner.clone(),
            collection,
            rkey: event.rkey.clone(),
            rev: event.rev.clone(),
            body,
        })
    }
}

// ─── Field extraction ────────────────────────────────────────────────────────

fn text_field(record: &Value, field: &'static str) -> Result<String, MapError> {
    match record.get(field).and_then(Value::as_str) {
        Some(s) if !s.trim().is_empty() => Ok(s.to_string()),
        _ => Err(MapError::MissingField { field }),
    }
}

fn optional_text(record: &Value, field: &str) -> Option<String> {
    record
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn check_labels(record: &Value) -> Result<(), MapError> {
    if let Some(labels) = record.get("labels").and_then(Value::as_array) {
        for label in labels.iter().filter_map(Value::as_str) {
            if DISALLOWED_LABELS.contains(&label) {
                return Err(MapError::DisallowedLabel {
                    label: label.to_string(),
                });
            }
        }
    }
    Ok(())
}

// ─── Privacy policy ──────────────────────────────────────────────────────────

/// Apply the location privacy policy.
///
/// - `precise`: coordinates kept, fine geohash derived.
/// - `coarse`: coordinates cleared; a truncated geohash survives.
/// - `none` (or absent consent): coordinates and geohash cleared.
///
/// Coordinates are validated before any encoding; out-of-range or
/// non-finite values are rejected rather than truncated.
fn map_location(value: Option<&Value>) -> Result<Option<Location>, MapError> {
    let Some(loc) = value else {
        return Ok(None);
    };
    if loc.is_null() {
        return Ok(None);
    }
    let loc = loc.as_object().ok_or_else(|| MapError::MalformedLocation {
        reason: "location is not an object".into(),
    })?;

    let consent = LocationConsent::parse(loc.get("consent").and_then(Value::as_str));
    let label = loc
        .get("label")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from);

    let coords = match (
        loc.get("latitude").and_then(Value::as_f64),
        loc.get("longitude").and_then(Value::as_f64),
    ) {
        (Some(lat), Some(lng)) => {
            validate_coordinates(lat, lng)?;
            Some((lat, lng))
        }
        (None, None) => None,
        _ => {
            return Err(MapError::MalformedLocation {
                reason: "latitude and longitude must both be present".into(),
            })
        }
    };

    let mapped = match (consent, coords) {
        (LocationConsent::Precise, Some((lat, lng))) => Location {
            latitude: Some(lat),
            longitude: Some(lng),
            geohash: Some(geohash_encode(lat, lng, GEOHASH_PRECISE_LEN)),
            label,
        },
        (LocationConsent::Coarse, Some((lat, lng))) => Location {
            latitude: None,
            longitude: None,
            geohash: Some(geohash_encode(lat, lng, GEOHASH_COARSE_LEN)),
            label,
        },
        // No consent, or consented but no coordinates supplied: only the
        // free-text label survives.
        (_, _) => Location {
            latitude: None,
            longitude: None,
            geohash: None,
            label,
        },
    };

    if mapped == Location::default() {
        Ok(None)
    } else {
        Ok(Some(mapped))
    }
}

fn validate_coordinates(lat: f64, lng: f64) -> Result<(), MapError> {
    if !lat.is_finite() || !lng.is_finite() {
        return Err(MapError::MalformedLocation {
            reason: "coordinates must be finite".into(),
        });
    }
    if !(-90.0..=90.0).contains(&lat) {
        return Err(MapError::MalformedLocation {
            reason: format!("latitude {lat} out of range"),
        });
    }
    if !(-180.0..=180.0).contains(&lng) {
        return Err(MapError::MalformedLocation {
            reason: format!("longitude {lng} out of range"),
        });
    }
    Ok(())
}

// ─── Geohash ─────────────────────────────────────────────────────────────────

const GEOHASH_ALPHABET: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Encode coordinates as a geohash of `len` characters.
///
/// Standard bit-interleaving: even bits refine longitude, odd bits
/// latitude, five bits per base-32 character.
fn geohash_encode(lat: f64, lng: f64, len: usize) -> String {
    let mut lat_range = (-90.0f64, 90.0f64);
    let mut lng_range = (-180.0f64, 180.0f64);
    let mut out = String::with_capacity(len);
    let mut bits = 0u8;
    let mut bit_count = 0u8;
    let mut even = true;

    while out.len() < len {
        let (range, value) = if even {
            (&mut lng_range, lng)
        } else {
            (&mut lat_range, lat)
        };
        let mid = (range.0 + range.1) / 2.0;
        bits <<= 1;
        if value >= mid {
            bits |= 1;
            range.0 = mid;
        } else {
            range.1 = mid;
        }
        even = !even;
        bit_count += 1;
        if bit_count == 5 {
            out.push(GEOHASH_ALPHABET[bits as usize] as char);
            bits = 0;
            bit_count = 0;
        }
    }
    out
}

// ─── Tests ────────────────────────────────────────────────────────────────────
