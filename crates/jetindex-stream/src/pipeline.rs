//! Processing pipeline — filter → map → persist → advance cursor.
//!
//! No single bad record halts the stream: decode failures never reach
//! here, filter rejects and mapping errors are counted and dropped, and
//! permanent persistence failures are counted and surfaced. Only
//! exhausting the transient-persistence retry budget is fatal, at which
//! point the connector reports unhealthy.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, warn};

use jetindex_core::entity::{DomainEntity, IdempotencyKey};
use jetindex_core::error::{IndexerError, StorageError};
use jetindex_core::filter::RecordFilter;
use jetindex_core::mapper::EntityMapper;
use jetindex_core::retry::RetryPolicy;
use jetindex_core::tracker::{EntityRepository, SequenceTracker, WriteOutcome};
use jetindex_core::types::{Collection, CommitEvent, CommitOp};
use jetindex_observability::IndexerMetrics;

use crate::queue::SharedReceiver;

/// The write a commit resolved to, retried as one unit.
enum WriteOp<'a> {
    Upsert(&'a DomainEntity, IdempotencyKey),
    Delete {
        owner: &'a str,
        collection: Collection,
        rkey: &'a str,
        rev: &'a str,
        key: IdempotencyKey,
    },
}

/// Shared state for the processing tasks.
pub(crate) struct Pipeline {
    filter: RecordFilter,
    mapper: EntityMapper,
    repository: Arc<dyn EntityRepository>,
    tracker: Arc<SequenceTracker>,
    persistence: RetryPolicy,
    metrics: IndexerMetrics,
}

impl Pipeline {
    pub(crate) fn new(
        repository: Arc<dyn EntityRepository>,
        tracker: Arc<SequenceTracker>,
        persistence: RetryPolicy,
        metrics: IndexerMetrics,
    ) -> Self {
        Self {
            filter: RecordFilter::new(),
            mapper: EntityMapper::new(),
            repository,
            tracker,
            persistence,
            metrics,
        }
    }

    /// Drain the queue until the producer closes it. Returns `Err` only
    /// on retry-budget exhaustion (fatal).
    pub(crate) async fn run(self: Arc<Self>, receiver: SharedReceiver) -> Result<(), IndexerError> {
        while let Some(event) = receiver.pop().await {
            self.process(event).await?;
        }
        Ok(())
    }

    /// Fully decide one commit, then advance the cursor past it.
    async fn process(&self, event: CommitEvent) -> Result<(), IndexerError> {
        let started = Instant::now();

        match self.filter.check(&event) {
            Err(reason) => {
                self.metrics.record_reject(reason.code());
                debug!(
                    collection = %event.collection,
                    rkey = %event.rkey,
                    %reason,
                    "commit rejected"
                );
            }
            Ok(collection) => {
                let outcome = if event.operation == CommitOp::Delete {
                    let key =
                        IdempotencyKey::derive(&event.owner, collection, &event.rkey, &event.rev);
                    self.persist(WriteOp::Delete {
                        owner: &event.owner,
                        collection,
                        rkey: &event.rkey,
                        rev: &event.rev,
                        key,
                    })
                    .await?
                } else {
                    match self.mapper.map(&event) {
                        Err(map_err) => {
                            self.metrics.mapping_errors.add(1, &[]);
                            warn!(
                                owner = %event.owner,
                                collection = %event.collection,
                                rkey = %event.rkey,
                                error = %map_err,
                                "record passed filter but failed mapping; dropped"
                            );
                            None
                        }
                        Ok(entity) => {
                            let key = entity.idempotency_key();
                            self.persist(WriteOp::Upsert(&entity, key)).await?
                        }
                    }
                };

                match outcome {
                    Some(WriteOutcome::Applied) => self.metrics.record_upsert(collection.nsid()),
                    Some(WriteOutcome::Duplicate) => self.metrics.duplicates.add(1, &[]),
                    None => {}
                }
            }
        }

        // The record is fully decided (stored, duplicate, or dropped) —
        // the cursor may advance past it. A failed advance only widens
        // the replay window, which idempotency absorbs.
        if let Err(advance_err) = self.tracker.advance(event.seq).await {
            warn!(seq = event.seq, error = %advance_err, "cursor advance failed");
        }

        self.metrics
            .record_latency(started.elapsed().as_secs_f64() * 1_000.0);
        let now_us = chrono::Utc::now().timestamp_micros().max(0) as u64;
        self.metrics
            .record_lag(now_us.saturating_sub(event.seq) as f64 / 1_000.0);

        Ok(())
    }

    /// Execute a write with bounded retries on transient failures.
    ///
    /// Returns `Ok(None)` when the write failed permanently (counted and
    /// surfaced, never retried). Returns `Err` only when the transient
    /// retry budget is exhausted.
    async fn persist(&self, op: WriteOp<'_>) -> Result<Option<WriteOutcome>, IndexerError> {
        let mut attempt = 0u32;
        loop {
            let result = match &op {
                WriteOp::Upsert(entity, key) => self.repository.upsert(entity, key).await,
                WriteOp::Delete {
                    owner,
                    collection,
                    rkey,
                    rev,
                    key,
                } => {
                    self.repository
                        .soft_delete(owner, *collection, rkey, rev, key)
                        .await
                }
            };

            match result {
                Ok(outcome) => return Ok(Some(outcome)),
                Err(StorageError::Permanent(reason)) => {
                    self.metrics.permanent_write_failures.add(1, &[]);
                    error!(%reason, "permanent persistence failure; record dropped");
                    return Ok(None);
                }
                Err(StorageError::Transient(reason)) => {
                    attempt += 1;
                    match self.persistence.next_delay(attempt) {
                        Some(delay) => {
                            warn!(attempt, %reason, delay_ms = delay.as_millis() as u64,
                                "transient persistence failure; retrying");
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            return Err(IndexerError::RetriesExhausted {
                                attempts: attempt,
                                reason,
                            })
                        }
                    }
                }
            }
        }
    }
}
