//! Sequence tracker and the storage-facing traits.
//!
//! The cursor is the sole durable progress checkpoint: the highest
//! sequence value whose corresponding write has committed. It is a
//! high-water mark for resume positioning only — uniqueness is the
//! idempotency key's job, never the cursor's.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::entity::{DomainEntity, IdempotencyKey};
use crate::error::StorageError;
use crate::types::Collection;

// ─── Repository trait ────────────────────────────────────────────────────────

/// Outcome of an idempotent write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The write committed and is now visible.
    Applied,
    /// A marker for this exact idempotency key already existed; nothing
    /// was written.
    Duplicate,
}

/// Durable, deduplicated, transactional entity writes.
///
/// Implementations must guarantee that a mid-transaction failure rolls
/// back atomically — partial visibility is never observable.
#[async_trait]
pub trait EntityRepository: Send + Sync {
    /// Upsert the entity's current-state row and record the idempotency
    /// marker in one transaction.
    async fn upsert(
        &self,
        entity: &DomainEntity,
        key: &IdempotencyKey,
    ) -> Result<WriteOutcome, StorageError>;

    /// Soft-delete (tombstone) the entity — the row is retained but
    /// excluded from active-entity queries. Never a physical removal.
    async fn soft_delete(
        &self,
        owner: &str,
        collection: Collection,
        rkey: &str,
        rev: &str,
        key: &IdempotencyKey,
    ) -> Result<WriteOutcome, StorageError>;
}

// ─── Cursor store trait ──────────────────────────────────────────────────────

/// Durable cursor storage with monotonic last-write-wins semantics.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Load the saved cursor for an indexer id (`None` if never saved).
    async fn load(&self, indexer_id: &str) -> Result<Option<u64>, StorageError>;

    /// Advance the cursor. Lower-or-equal values are no-ops.
    async fn advance(&self, indexer_id: &str, seq: u64) -> Result<(), StorageError>;
}

// ─── SequenceTracker ─────────────────────────────────────────────────────────

/// Tracks the durable resume cursor for one indexer.
///
/// Wraps a [`CursorStore`] with an in-process watermark so that
/// out-of-order `advance` calls from concurrent processing tasks within
/// one process cannot regress the cursor, even though no cross-process
/// coordination exists.
pub struct SequenceTracker {
    store: Arc<dyn CursorStore>,
    indexer_id: String,
    watermark: AtomicU64,
    seen: AtomicBool,
}

impl SequenceTracker {
    pub fn new(store: Arc<dyn CursorStore>, indexer_id: impl Into<String>) -> Self {
        Self {
            store,
            indexer_id: indexer_id.into(),
            watermark: AtomicU64::new(0),
            seen: AtomicBool::new(false),
        }
    }

    /// Load the saved cursor and prime the in-process watermark.
    /// Returns `(seq, found)`.
    pub async fn load(&self) -> Result<(u64, bool), StorageError> {
        match self.store.load(&self.indexer_id).await? {
            Some(seq) => {
                self.watermark.fetch_max(seq, Ordering::SeqCst);
                self.seen.store(true, Ordering::SeqCst);
                Ok((seq, true))
            }
            None => Ok((0, false)),
        }
    }

    /// Advance the cursor after the corresponding write has durably
    /// committed (or the record was terminally decided). Lower-or-equal
    /// values are no-ops and never touch the store.
    pub async fn advance(&self, seq: u64) -> Result<(), StorageError> {
        let prev = self.watermark.fetch_max(seq, Ordering::SeqCst);
        if prev >= seq && self.seen.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.seen.store(true, Ordering::SeqCst);
        self.store.advance(&self.indexer_id, seq).await
    }

    /// The highest sequence advanced in this process (0 if none yet).
    pub fn current(&self) -> u64 {
        self.watermark.load(Ordering::SeqCst)
    }

    /// The resume position for a new subscription, if any cursor exists.
    pub fn resume_position(&self) -> Option<u64> {
        if self.seen.load(Ordering::SeqCst) {
            Some(self.watermark.load(Ordering::SeqCst))
        } else {
            None
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
