//! Bounded commit queue with backpressure gating.
//!
//! The queue is the only coupling between the reading task and the
//! processing tasks: the reader never blocks on persistence I/O, only on
//! this queue's flow-control gate. Depth changes and controller state
//! are observed together so pause/resume decisions never race.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use jetindex_core::backpressure::{BackpressureConfig, BackpressureController, FlowTransition};
use jetindex_core::types::CommitEvent;
use jetindex_observability::IndexerMetrics;

/// How often a paused reader re-checks the stall alarm while waiting for
/// a resume wakeup.
const STALL_POLL: Duration = Duration::from_millis(250);

struct Shared {
    depth: AtomicUsize,
    controller: BackpressureController,
    resume: Notify,
    metrics: IndexerMetrics,
}

/// Producer half — owned by the reading task.
pub struct CommitQueue {
    tx: mpsc::Sender<CommitEvent>,
    shared: Arc<Shared>,
}

/// Consumer half — one per processing task via [`SharedReceiver`].
pub struct CommitQueueReceiver {
    rx: mpsc::Receiver<CommitEvent>,
    shared: Arc<Shared>,
}

/// Create a bounded queue. Channel capacity sits above the pause
/// threshold so the gate, not the channel, is what stops the reader.
pub fn commit_queue(
    config: BackpressureConfig,
    metrics: IndexerMetrics,
) -> (CommitQueue, CommitQueueReceiver) {
    let capacity = config.pause_at * 2;
    let (tx, rx) = mpsc::channel(capacity.max(2));
    let shared = Arc::new(Shared {
        depth: AtomicUsize::new(0),
        controller: BackpressureController::new(config),
        resume: Notify::new(),
        metrics,
    });
    (
        CommitQueue {
            tx,
            shared: Arc::clone(&shared),
        },
        CommitQueueReceiver { rx, shared },
    )
}

impl CommitQueue {
    /// Wait until flow control permits another transport read.
    ///
    /// While paused this also surfaces the stall alert when downstream
    /// slowness persists beyond the configured duration.
    pub async fn ready(&self) {
        while self.shared.controller.is_paused() {
            if self.shared.controller.check_stall() {
                self.shared.metrics.backpressure_stalls.add(1, &[]);
                warn!(
                    depth = self.shared.depth.load(Ordering::SeqCst),
                    "backpressure pause exceeded alert threshold; downstream is slow"
                );
            }
            tokio::select! {
                _ = self.shared.resume.notified() => {}
                _ = tokio::time::sleep(STALL_POLL) => {}
            }
        }
    }

    /// Enqueue a commit. Returns `Err` if all consumers are gone.
    pub async fn push(&self, event: CommitEvent) -> Result<(), CommitEvent> {
        // Depth is incremented before the send so a concurrent pop can
        // never observe a negative balance.
        let depth = self.shared.depth.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(FlowTransition::Paused) = self.shared.controller.observe(depth) {
            self.shared.metrics.backpressure_pauses.add(1, &[]);
            info!(depth, "backpressure engaged; suspending transport reads");
        }

        match self.tx.send(event).await {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendError(event)) => {
                self.shared.depth.fetch_sub(1, Ordering::SeqCst);
                Err(event)
            }
        }
    }

    /// Current queue depth (for liveness surfaces).
    pub fn depth(&self) -> usize {
        self.shared.depth.load(Ordering::SeqCst)
    }

    /// Returns `true` while the flow-control gate is closed.
    pub fn is_paused(&self) -> bool {
        self.shared.controller.is_paused()
    }
}

impl CommitQueueReceiver {
    /// Dequeue the next commit; `None` once the producer is dropped and
    /// the queue is drained.
    pub async fn pop(&mut self) -> Option<CommitEvent> {
        let event = self.rx.recv().await?;
        let depth = self.shared.depth.fetch_sub(1, Ordering::SeqCst) - 1;
        if let Some(FlowTransition::Resumed) = self.shared.controller.observe(depth) {
            self.shared.metrics.backpressure_resumes.add(1, &[]);
            debug!(depth, "backpressure released; resuming transport reads");
            self.shared.resume.notify_waiters();
        }
        Some(event)
    }

    /// Share this receiver between multiple processing tasks.
    pub fn into_shared(self) -> SharedReceiver {
        SharedReceiver {
            inner: Arc::new(tokio::sync::Mutex::new(self)),
        }
    }
}

/// A cloneable handle letting several processing tasks drain one queue.
#[derive(Clone)]
pub struct SharedReceiver {
    inner: Arc<tokio::sync::Mutex<CommitQueueReceiver>>,
}

impl SharedReceiver {
    pub async fn pop(&self) -> Option<CommitEvent> {
        self.inner.lock().await.pop().await
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
