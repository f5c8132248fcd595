//! SQLite storage backend for JetIndex.
//!
//! Persists entities, idempotency markers, a revision log, and the
//! resume cursor to a single SQLite file. Uses `sqlx` with WAL mode for
//! concurrent read performance.
//!
//! # Usage
//! ```rust,no_run
//! use jetindex_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./index.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use jetindex_core::entity::{DomainEntity, EntityBody, IdempotencyKey};
use jetindex_core::error::StorageError;
use jetindex_core::tracker::{CursorStore, EntityRepository, WriteOutcome};
use jetindex_core::types::Collection;

use crate::StoredEntity;

/// SQLite-backed entity repository + cursor store.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./index.db"`) or a full
    /// SQLite URL (`"sqlite:./index.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, StorageError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(classify)?;
        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// All data is lost when the pool is dropped. Ideal for tests.
    /// Pinned to a single connection: every pooled connection would
    /// otherwise open its own empty in-memory database.
    pub async fn in_memory() -> Result<Self, StorageError> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(classify)?;
        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), StorageError> {
        // WAL mode — better concurrent read throughput
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(classify)?;

        // Current-state rows, one per (owner, collection, rkey).
        // body_json is NULL only for tombstones of never-created keys.
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS entities (
                owner      TEXT    NOT NULL,
                collection TEXT    NOT NULL,
                rkey       TEXT    NOT NULL,
                rev        TEXT    NOT NULL,
                body_json  TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                deleted_at INTEGER,
                PRIMARY KEY (owner, collection, rkey)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        // Idempotency markers — one row per applied (record, revision).
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS idempotency_markers (
                marker     TEXT    PRIMARY KEY,
                applied_at INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        // Revision log — prior revisions are marked superseded, never lost.
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS entity_revisions (
                owner      TEXT    NOT NULL,
                collection TEXT    NOT NULL,
                rkey       TEXT    NOT NULL,
                rev        TEXT    NOT NULL,
                superseded INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (owner, collection, rkey, rev)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        // Resume cursor, one row per indexer id.
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS cursors (
                indexer_id TEXT    PRIMARY KEY,
                seq        INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_entities_collection ON entities (collection);",
        )
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        Ok(())
    }

    // ─── Queries ────────────────────────────────────────────────────────────

    /// Look up the current-state row for a key.
    pub async fn get_entity(
        &self,
        owner: &str,
        collection: Collection,
        rkey: &str,
    ) -> Result<Option<StoredEntity>, StorageError> {
        let row = sqlx::query(
            "SELECT owner, collection, rkey, rev, body_json, deleted_at
             FROM entities WHERE owner = ? AND collection = ? AND rkey = ?",
        )
        .bind(owner)
        .bind(collection.nsid())
        .bind(rkey)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?;

        row.map(row_to_entity).transpose()
    }

    /// All non-tombstoned rows for a collection, ordered by key.
    pub async fn active_entities(
        &self,
        collection: Collection,
    ) -> Result<Vec<StoredEntity>, StorageError> {
        let rows = sqlx::query(
            "SELECT owner, collection, rkey, rev, body_json, deleted_at
             FROM entities
             WHERE collection = ? AND deleted_at IS NULL
             ORDER BY owner, rkey",
        )
        .bind(collection.nsid())
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        rows.into_iter().map(row_to_entity).collect()
    }

    /// Total number of rows, tombstones included.
    pub async fn entity_count(&self) -> Result<u64, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM entities")
            .fetch_one(&self.pool)
            .await
            .map_err(classify)?;
        let cnt: i64 = row.get("cnt");
        Ok(cnt as u64)
    }

    /// Number of non-tombstoned rows across all collections.
    pub async fn active_entity_count(&self) -> Result<u64, StorageError> {
        let row =
            sqlx::query("SELECT COUNT(*) as cnt FROM entities WHERE deleted_at IS NULL")
                .fetch_one(&self.pool)
                .await
                .map_err(classify)?;
        let cnt: i64 = row.get("cnt");
        Ok(cnt as u64)
    }

    /// The revision log for a key: (rev, superseded) pairs.
    pub async fn revisions(
        &self,
        owner: &str,
        collection: Collection,
        rkey: &str,
    ) -> Result<Vec<(String, bool)>, StorageError> {
        let rows = sqlx::query(
            "SELECT rev, superseded FROM entity_revisions
             WHERE owner = ? AND collection = ? AND rkey = ?
             ORDER BY rowid",
        )
        .bind(owner)
        .bind(collection.nsid())
        .bind(rkey)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        Ok(rows
            .into_iter()
            .map(|r| (r.get("rev"), r.get::<i64, _>("superseded") != 0))
            .collect())
    }
}

// ─── EntityRepository impl ───────────────────────────────────────────────────

#[async_trait]
impl EntityRepository for SqliteStorage {
    async fn upsert(
        &self,
        entity: &DomainEntity,
        key: &IdempotencyKey,
    ) -> Result<WriteOutcome, StorageError> {
        let body_json = serde_json::to_string(&entity.body)
            .map_err(|e| StorageError::Permanent(format!("body serialization: {e}")))?;
        let now = chrono::Utc::now().timestamp();

        let mut tx = self.pool.begin().await.map_err(classify)?;

        if marker_exists(&mut tx, key).await? {
            // Dropping the transaction rolls it back; nothing was written.
            return Ok(WriteOutcome::Duplicate);
        }
        insert_marker(&mut tx, key, now).await?;
        supersede_revisions(&mut tx, &entity.owner, entity.collection, &entity.rkey).await?;

        sqlx::query(
            "INSERT INTO entity_revisions (owner, collection, rkey, rev, superseded)
             VALUES (?, ?, ?, ?, 0)
             ON CONFLICT (owner, collection, rkey, rev) DO UPDATE SET superseded = 0",
        )
        .bind(&entity.owner)
        .bind(entity.collection.nsid())
        .bind(&entity.rkey)
        .bind(&entity.rev)
        .execute(&mut *tx)
        .await
        .map_err(classify)?;

        sqlx::query(
            "INSERT INTO entities
                 (owner, collection, rkey, rev, body_json, created_at, updated_at, deleted_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, NULL)
             ON CONFLICT (owner, collection, rkey) DO UPDATE SET
                 rev        = excluded.rev,
                 body_json  = excluded.body_json,
                 updated_at = excluded.updated_at,
                 deleted_at = NULL",
        )
        .bind(&entity.owner)
        .bind(entity.collection.nsid())
        .bind(&entity.rkey)
        .bind(&entity.rev)
        .bind(&body_json)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(classify)?;

        tx.commit().await.map_err(classify)?;

        debug!(
            owner = %entity.owner,
            collection = %entity.collection,
            rkey = %entity.rkey,
            rev = %entity.rev,
            "entity upserted"
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
        let now = chrono::Utc::now().timestamp();

        let mut tx = self.pool.begin().await.map_err(classify)?;

        if marker_exists(&mut tx, key).await? {
            return Ok(WriteOutcome::Duplicate);
        }
        insert_marker(&mut tx, key, now).await?;
        supersede_revisions(&mut tx, owner, collection, rkey).await?;

        sqlx::query(
            "INSERT INTO entity_revisions (owner, collection, rkey, rev, superseded)
             VALUES (?, ?, ?, ?, 0)
             ON CONFLICT (owner, collection, rkey, rev) DO UPDATE SET superseded = 0",
        )
        .bind(owner)
        .bind(collection.nsid())
        .bind(rkey)
        .bind(rev)
        .execute(&mut *tx)
        .await
        .map_err(classify)?;

        // Tombstone: the row is retained (body untouched if present),
        // never physically removed.
        sqlx::query(
            "INSERT INTO entities
                 (owner, collection, rkey, rev, body_json, created_at, updated_at, deleted_at)
             VALUES (?, ?, ?, ?, NULL, ?, ?, ?)
             ON CONFLICT (owner, collection, rkey) DO UPDATE SET
                 rev        = excluded.rev,
                 updated_at = excluded.updated_at,
                 deleted_at = excluded.deleted_at",
        )
        .bind(owner)
        .bind(collection.nsid())
        .bind(rkey)
        .bind(rev)
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(classify)?;

        tx.commit().await.map_err(classify)?;

        debug!(owner, collection = %collection, rkey, rev, "entity tombstoned");
        Ok(WriteOutcome::Applied)
    }
}

// ─── CursorStore impl ────────────────────────────────────────────────────────

#[async_trait]
impl CursorStore for SqliteStorage {
    async fn load(&self, indexer_id: &str) -> Result<Option<u64>, StorageError> {
        let row = sqlx::query("SELECT seq FROM cursors WHERE indexer_id = ?")
            .bind(indexer_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;

        Ok(row.map(|r| r.get::<i64, _>("seq") as u64))
    }

    async fn advance(&self, indexer_id: &str, seq: u64) -> Result<(), StorageError> {
        // Monotonic last-write-wins: the WHERE clause turns lower-or-equal
        // advances into no-ops.
        sqlx::query(
            "INSERT INTO cursors (indexer_id, seq, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT (indexer_id) DO UPDATE SET
                 seq        = excluded.seq,
                 updated_at = excluded.updated_at
             WHERE excluded.seq > cursors.seq",
        )
        .bind(indexer_id)
        .bind(seq as i64)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        Ok(())
    }
}

// ─── Transaction helpers ─────────────────────────────────────────────────────

async fn marker_exists(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    key: &IdempotencyKey,
) -> Result<bool, StorageError> {
    let row = sqlx::query("SELECT 1 FROM idempotency_markers WHERE marker = ?")
        .bind(key.as_str())
        .fetch_optional(&mut **tx)
        .await
        .map_err(classify)?;
    Ok(row.is_some())
}

async fn insert_marker(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    key: &IdempotencyKey,
    now: i64,
) -> Result<(), StorageError> {
    sqlx::query("INSERT INTO idempotency_markers (marker, applied_at) VALUES (?, ?)")
        .bind(key.as_str())
        .bind(now)
        .execute(&mut **tx)
        .await
        .map_err(classify)?;
    Ok(())
}

async fn supersede_revisions(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    owner: &str,
    collection: Collection,
    rkey: &str,
) -> Result<(), StorageError> {
    sqlx::query(
        "UPDATE entity_revisions SET superseded = 1
         WHERE owner = ? AND collection = ? AND rkey = ? AND superseded = 0",
    )
    .bind(owner)
    .bind(collection.nsid())
    .bind(rkey)
    .execute(&mut **tx)
    .await
    .map_err(classify)?;
    Ok(())
}

// ─── Row mapping & error classification ──────────────────────────────────────

fn row_to_entity(row: sqlx::sqlite::SqliteRow) -> Result<StoredEntity, StorageError> {
    let collection_str: String = row.get("collection");
    let collection = Collection::from_nsid(&collection_str)
        .ok_or_else(|| StorageError::Permanent(format!("unknown collection '{collection_str}'")))?;

    let body: Option<EntityBody> = match row.get::<Option<String>, _>("body_json") {
        Some(json) => Some(
            serde_json::from_str(&json)
                .map_err(|e| StorageError::Permanent(format!("body deserialization: {e}")))?,
        ),
        None => None,
    };

    Ok(StoredEntity {
        owner: row.get("owner"),
        collection,
        rkey: row.get("rkey"),
        rev: row.get("rev"),
        body,
        deleted_at: row.get("deleted_at"),
    })
}

/// Classify an sqlx error into the transient/permanent taxonomy.
///
/// Contention and connectivity failures are transient (the caller retries
/// with backoff); constraint violations indicate genuine data problems
/// and are permanent.
fn classify(err: sqlx::Error) -> StorageError {
    match &err {
        sqlx::Error::Database(db) => {
            let message = db.message().to_string();
            if message.contains("locked") || message.contains("busy") {
                StorageError::Transient(message)
            } else {
                StorageError::Permanent(message)
            }
        }
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StorageError::Transient(err.to_string()),
        sqlx::Error::RowNotFound
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_) => StorageError::Permanent(err.to_string()),
        _ => StorageError::Transient(err.to_string()),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
