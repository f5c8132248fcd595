//! The connector — owns the transport, the queue, and the processing
//! tasks, and drives the typed state machine:
//!
//! ```text
//! Disconnected → Connecting → Streaming → (Disconnected | Draining)
//!                                  │
//!                                  └── Failed (retry budget exhausted)
//! ```
//!
//! On transport error or unexpected close the connector schedules a
//! reconnect with exponential backoff plus jitter and resumes from the
//! last persisted cursor. Backoff waits race the shutdown signal so
//! graceful shutdown never leaks background work.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use futures::StreamExt;

use jetindex_codec::{decode_frame, Frame};
use jetindex_core::error::IndexerError;
use jetindex_core::tracker::{CursorStore, EntityRepository, SequenceTracker};
use jetindex_observability::IndexerMetrics;

use crate::config::ConnectorConfig;
use crate::pipeline::Pipeline;
use crate::queue::{commit_queue, CommitQueue};
use crate::transport::FrameTransport;

// ─── State ───────────────────────────────────────────────────────────────────

/// Connector lifecycle state, published through a watch channel.
/// Liveness for the surrounding service is `Streaming`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    Disconnected,
    Connecting,
    Streaming,
    Draining,
    Failed,
    Stopped,
}

impl std::fmt::Display for ConnectorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Streaming => write!(f, "streaming"),
            Self::Draining => write!(f, "draining"),
            Self::Failed => write!(f, "failed"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

// ─── Handle ──────────────────────────────────────────────────────────────────

/// Handle to a running connector.
pub struct ConnectorHandle {
    state_rx: watch::Receiver<ConnectorState>,
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<Result<(), IndexerError>>,
}

impl ConnectorHandle {
    /// Current lifecycle state.
    pub fn state(&self) -> ConnectorState {
        *self.state_rx.borrow()
    }

    /// Liveness signal: `true` while the subscription is up.
    pub fn is_streaming(&self) -> bool {
        self.state() == ConnectorState::Streaming
    }

    /// Watch receiver for state transitions.
    pub fn state_watch(&self) -> watch::Receiver<ConnectorState> {
        self.state_rx.clone()
    }

    /// Signal graceful shutdown, drain the queue, and wait for the
    /// connector to stop.
    pub async fn shutdown(self) -> Result<(), IndexerError> {
        let _ = self.shutdown_tx.send(true);
        self.join
            .await
            .map_err(|e| IndexerError::Other(format!("connector task panicked: {e}")))?
    }

    /// Wait for the connector to finish on its own (it only does so on a
    /// fatal error or after a shutdown signal).
    pub async fn join(self) -> Result<(), IndexerError> {
        self.join
            .await
            .map_err(|e| IndexerError::Other(format!("connector task panicked: {e}")))?
    }
}

// ─── Connector ───────────────────────────────────────────────────────────────

/// Orchestrates transport, decode, queueing, backpressure, reconnection,
/// and checkpointing.
pub struct Connector {
    config: ConnectorConfig,
    transport: Arc<dyn FrameTransport>,
    repository: Arc<dyn EntityRepository>,
    tracker: Arc<SequenceTracker>,
    metrics: IndexerMetrics,
}

impl Connector {
    pub fn new(
        config: ConnectorConfig,
        transport: Arc<dyn FrameTransport>,
        repository: Arc<dyn EntityRepository>,
        cursor_store: Arc<dyn CursorStore>,
        metrics: IndexerMetrics,
    ) -> Self {
        let tracker = Arc::new(SequenceTracker::new(cursor_store, &config.indexer_id));
        Self {
            config,
            transport,
            repository,
            tracker,
            metrics,
        }
    }

    /// Load the cursor and start the connector in the background.
    pub async fn spawn(self) -> Result<ConnectorHandle, IndexerError> {
        let (seq, found) = self.tracker.load().await?;
        if found {
            info!(cursor = seq, indexer_id = %self.config.indexer_id, "resuming from saved cursor");
        } else {
            info!(indexer_id = %self.config.indexer_id, "no saved cursor; starting from live tail");
        }

        let (state_tx, state_rx) = watch::channel(ConnectorState::Disconnected);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(self.run(state_tx, shutdown_rx));

        Ok(ConnectorHandle {
            state_rx,
            shutdown_tx,
            join,
        })
    }

    async fn run(
        self,
        state: watch::Sender<ConnectorState>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), IndexerError> {
        let (queue, receiver) = commit_queue(self.config.backpressure(), self.metrics.clone());

        // Processing tasks report fatal errors (retry-budget exhaustion)
        // through this channel; everything else they absorb. Capacity
        // covers every worker so a send can never wedge a drain.
        let (fatal_tx, mut fatal_rx) =
            mpsc::channel::<IndexerError>(self.config.processors.max(1));
        let pipeline = Arc::new(Pipeline::new(
            Arc::clone(&self.repository),
            Arc::clone(&self.tracker),
            self.config.persistence_policy(),
            self.metrics.clone(),
        ));
        let shared_rx = receiver.into_shared();
        let mut workers = Vec::with_capacity(self.config.processors.max(1));
        for worker in 0..self.config.processors.max(1) {
            let pipeline = Arc::clone(&pipeline);
            let rx = shared_rx.clone();
            let fatal_tx = fatal_tx.clone();
            workers.push(tokio::spawn(async move {
                if let Err(fatal) = pipeline.run(rx).await {
                    error!(worker, error = %fatal, "processing task failed");
                    let _ = fatal_tx.send(fatal).await;
                }
            }));
        }
        drop(fatal_tx);

        let reconnect = self.config.reconnect_policy();
        let mut attempt = 0u32;

        'outer: loop {
            if *shutdown.borrow() {
                break 'outer;
            }

            let _ = state.send(ConnectorState::Connecting);
            self.metrics.reconnect_attempts.add(1, &[]);
            let cursor = self.tracker.resume_position();

            let mut stream = match self.transport.subscribe(cursor).await {
                Err(transport_err) => {
                    let _ = state.send(ConnectorState::Disconnected);
                    attempt += 1;
                    let Some(delay) = reconnect.next_delay(attempt) else {
                        let _ = state.send(ConnectorState::Failed);
                        error!(attempt, error = %transport_err, "reconnect budget exhausted");
                        return Self::finish_failed(
                            queue,
                            workers,
                            IndexerError::Transport(transport_err.to_string()),
                        )
                        .await;
                    };
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %transport_err,
                        "connect failed; backing off"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break 'outer;
                            }
                        }
                    }
                    continue;
                }
                Ok(stream) => stream,
            };

            attempt = 0;
            self.metrics.reconnect_successes.add(1, &[]);
            let _ = state.send(ConnectorState::Streaming);
            info!(endpoint = self.transport.endpoint(), ?cursor, "streaming");

            // Read loop — gate on backpressure before every transport read.
            loop {
                tokio::select! {
                    _ = queue.ready() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() { break 'outer; }
                        continue;
                    }
                    fatal = fatal_rx.recv() => {
                        let _ = state.send(ConnectorState::Failed);
                        return Self::finish_failed(queue, workers, unwrap_fatal(fatal)).await;
                    }
                }

                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() { break 'outer; }
                    }
                    fatal = fatal_rx.recv() => {
                        let _ = state.send(ConnectorState::Failed);
                        return Self::finish_failed(queue, workers, unwrap_fatal(fatal)).await;
                    }
                    frame = stream.next() => match frame {
                        None => {
                            info!("stream ended; reconnecting");
                            break;
                        }
                        Some(Err(transport_err)) => {
                            warn!(error = %transport_err, "transport error; reconnecting");
                            break;
                        }
                        Some(Ok(bytes)) => {
                            self.metrics.frames_processed.add(1, &[]);
                            match decode_frame(&bytes) {
                                Err(decode_err) => {
                                    // Dropped, counted, never retried.
                                    self.metrics.decode_errors.add(1, &[]);
                                    debug!(error = %decode_err, "frame dropped");
                                }
                                Ok(Frame::Ignored { kind }) => {
                                    debug!(kind, "non-commit frame skipped");
                                }
                                Ok(Frame::Commit(event)) => {
                                    if queue.push(event).await.is_err() {
                                        // All consumers gone — a fatal is in flight.
                                        let _ = state.send(ConnectorState::Failed);
                                        let fatal = fatal_rx.recv().await;
                                        return Self::finish_failed(
                                            queue, workers, unwrap_fatal(fatal),
                                        )
                                        .await;
                                    }
                                }
                            }
                        }
                    }
                }
            }

            let _ = state.send(ConnectorState::Disconnected);
            attempt += 1;
            match reconnect.next_delay(attempt) {
                Some(delay) => {
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "disconnected; backing off before reconnect"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() { break 'outer; }
                        }
                    }
                }
                None => {
                    let _ = state.send(ConnectorState::Failed);
                    error!(attempt, "reconnect budget exhausted");
                    return Self::finish_failed(
                        queue,
                        workers,
                        IndexerError::Transport("reconnect budget exhausted".into()),
                    )
                    .await;
                }
            }
        }

        // Graceful shutdown: close the queue, let the processors drain
        // what was already enqueued, then stop.
        let _ = state.send(ConnectorState::Draining);
        info!("draining queue");
        drop(queue);
        for worker in workers {
            if let Err(join_err) = worker.await {
                warn!(error = %join_err, "processing task panicked during drain");
            }
        }
        // Surface a fatal that raced the shutdown signal, if any.
        if let Some(fatal) = fatal_rx.recv().await {
            let _ = state.send(ConnectorState::Failed);
            return Err(fatal);
        }

        let _ = state.send(ConnectorState::Stopped);
        info!(cursor = self.tracker.current(), "connector stopped");
        Ok(())
    }

    /// Tear down after a fatal error without leaking the workers.
    async fn finish_failed(
        queue: CommitQueue,
        workers: Vec<JoinHandle<()>>,
        fatal: IndexerError,
    ) -> Result<(), IndexerError> {
        drop(queue);
        for worker in workers {
            let _ = worker.await;
        }
        Err(fatal)
    }
}

fn unwrap_fatal(fatal: Option<IndexerError>) -> IndexerError {
    fatal.unwrap_or(IndexerError::Aborted {
        reason: "processing tasks exited unexpectedly".into(),
    })
}
