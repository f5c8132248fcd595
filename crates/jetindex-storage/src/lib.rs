//! jetindex-storage — pluggable storage backends for JetIndex.
//!
//! Backends:
//! - [`memory`] — in-memory (dev/testing, no persistence)
//! - [`sqlite`] — SQLite via `sqlx` (embedded, single-file persistence)
//!
//! Both implement the core `EntityRepository` and `CursorStore` traits
//! with identical semantics: idempotency-marker dedup, transactional
//! upserts, soft deletes, and a monotonic last-write-wins cursor.

use serde::{Deserialize, Serialize};

use jetindex_core::entity::EntityBody;
use jetindex_core::types::Collection;

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::InMemoryStorage;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;

/// A persisted current-state row, as returned by backend queries.
///
/// `body` is `None` only for tombstones created by a delete that arrived
/// before any create for the key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntity {
    pub owner: String,
    pub collection: Collection,
    pub rkey: String,
    pub rev: String,
    pub body: Option<EntityBody>,
    /// Tombstone timestamp (unix seconds); `None` while the row is active.
    pub deleted_at: Option<i64>,
}

impl StoredEntity {
    /// Returns `true` if this row is visible to active-entity queries.
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}
