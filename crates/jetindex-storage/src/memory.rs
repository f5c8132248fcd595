//! In-memory storage backend.
//!
//! Mirrors the SQLite backend's semantics (markers, upserts, tombstones,
//! monotonic cursor) without persistence. All data is lost when the
//! process exits. Useful for tests and short-lived indexers.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use jetindex_core::entity::{DomainEntity, IdempotencyKey};
use jetindex_core::error::StorageError;
use jetindex_core::tracker::{CursorStore, EntityRepository, WriteOutcome};
use jetindex_core::types::Collection;

use crate::StoredEntity;

type EntityKey = (String, Collection, String);

/// In-memory repository + cursor store.
#[derive(Default)]
pub struct InMemoryStorage {
    entities: Mutex<HashMap<EntityKey, StoredEntity>>,
    markers: Mutex<HashSet<String>>,
    cursors: Mutex<HashMap<String, u64>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the current-state row for a key.
    pub fn get(&self, owner: &str, collection: Collection, rkey: &str) -> Option<StoredEntity> {
        self.entities
            .lock()
            .unwrap()
            .get(&(owner.to_string(), collection, rkey.to_string()))
            .cloned()
    }

    /// All non-tombstoned rows for a collection.
    pub fn active_entities(&self, collection: Collection) -> Vec<StoredEntity> {
        self.entities
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.collection == collection && e.is_active())
            .cloned()
            .collect()
    }

    /// Total number of rows, tombstones included.
    pub fn entity_count(&self) -> usize {
        self.entities.lock().unwrap().len()
    }

    /// Number of non-tombstoned rows across all collections.
    pub fn active_entity_count(&self) -> usize {
        self.entities
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.is_active())
            .count()
    }

    /// Number of recorded idempotency markers.
    pub fn marker_count(&self) -> usize {
        self.markers.lock().unwrap().len()
    }

    fn check_and_insert_marker(&self, key: &IdempotencyKey) -> bool {
        self.markers.lock().unwrap().insert(key.as_str().to_string())
    }
}

#[async_trait]
impl EntityRepository for InMemoryStorage {
    async fn upsert(
        &self,
        entity: &DomainEntity,
        key: &IdempotencyKey,
    ) -> Result<WriteOutcome, StorageError> {
        if !self.check_and_insert_marker(key) {
            return Ok(WriteOutcome::Duplicate);
        }

        let map_key = (entity.owner.clone(), entity.collection, entity.rkey.clone());
        self.entities.lock().unwrap().insert(
            map_key,
            StoredEntity {
                owner: entity.owner.clone(),
                collection: entity.collection,
                rkey: entity.rkey.clone(),
                rev: entity.rev.clone(),
                body: Some(entity.body.clone()),
                deleted_at: None,
            },
        );
        Ok(WriteOutcome::Applied)
    }

    async fn soft_delete(
        &self,
        owner: &str,
        collection: Collection,
        rkey: &str,
        rev: &str,
        key: &IdempotencyKey,
    ) -> Result<WriteOutcome, StorageError> {
        if !self.check_and_insert_marker(key) {
            return Ok(WriteOutcome::Duplicate);
        }

        let now = chrono::Utc::now().timestamp();
        let map_key = (owner.to_string(), collection, rkey.to_string());
        let mut entities = self.entities.lock().unwrap();
        match entities.get_mut(&map_key) {
            Some(row) => {
                row.rev = rev.to_string();
                row.deleted_at = Some(now);
            }
            None => {
                // Tombstone for a key this indexer never saw created.
                entities.insert(
                    map_key,
                    StoredEntity {
                        owner: owner.to_string(),
                        collection,
                        rkey: rkey.to_string(),
                        rev: rev.to_string(),
                        body: None,
                        deleted_at: Some(now),
                    },
                );
            }
        }
        Ok(WriteOutcome::Applied)
    }
}

#[async_trait]
impl CursorStore for InMemoryStorage {
    async fn load(&self, indexer_id: &str) -> Result<Option<u64>, StorageError> {
        Ok(self.cursors.lock().unwrap().get(indexer_id).copied())
    }

    async fn advance(&self, indexer_id: &str, seq: u64) -> Result<(), StorageError> {
        let mut cursors = self.cursors.lock().unwrap();
        let entry = cursors.entry(indexer_id.to_string()).or_insert(0);
        if seq > *entry {
            *entry = seq;
        }
        Ok(())
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
