//! Error types for the jetindex pipeline.

use thiserror::Error;

/// Errors surfaced by a storage backend.
///
/// The transient/permanent split drives retry behavior at the processing
/// loop: transient errors are retried with backoff, permanent errors are
/// counted and surfaced, never retried.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Recoverable failure (connection loss, pool exhaustion, lock
    /// contention, serialization conflict). Safe to retry.
    #[error("transient storage error: {0}")]
    Transient(String),

    /// Non-recoverable failure (constraint violation indicating a genuine
    /// data problem). Retrying would fail identically.
    #[error("permanent storage error: {0}")]
    Permanent(String),
}

impl StorageError {
    /// Returns `true` if the error may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Errors that can occur while running the indexer.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Persistence retry budget exhausted — the indexer is unhealthy.
    #[error("persistence retries exhausted after {attempts} attempts: {reason}")]
    RetriesExhausted { attempts: u32, reason: String },

    #[error("indexer aborted: {reason}")]
    Aborted { reason: String },

    #[error("{0}")]
    Other(String),
}
