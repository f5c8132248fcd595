//! Shared harness for connector integration tests: a minimal CBOR
//! writer for building wire frames (the shipped crates only decode), a
//! scripted transport, and a gated repository for slow-consumer tests.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

use jetindex_core::entity::{DomainEntity, IdempotencyKey};
use jetindex_core::error::StorageError;
use jetindex_core::tracker::{EntityRepository, WriteOutcome};
use jetindex_core::types::Collection;
use jetindex_storage::InMemoryStorage;
use jetindex_stream::{FrameStream, FrameTransport, TransportError};

// ─── CBOR writer ─────────────────────────────────────────────────────────────

pub mod cbor {
    pub fn head(major: u8, arg: u64) -> Vec<u8> {
        let mut out = Vec::new();
        match arg {
            0..=23 => out.push((major << 5) | arg as u8),
            24..=0xff => {
                out.push((major << 5) | 24);
                out.push(arg as u8);
            }
            0x100..=0xffff => {
                out.push((major << 5) | 25);
                out.extend_from_slice(&(arg as u16).to_be_bytes());
            }
            0x1_0000..=0xffff_ffff => {
                out.push((major << 5) | 26);
                out.extend_from_slice(&(arg as u32).to_be_bytes());
            }
            _ => {
                out.push((major << 5) | 27);
                out.extend_from_slice(&arg.to_be_bytes());
            }
        }
        out
    }

    pub fn uint(n: u64) -> Vec<u8> {
        head(0, n)
    }

    pub fn text(s: &str) -> Vec<u8> {
        let mut out = head(3, s.len() as u64);
        out.extend_from_slice(s.as_bytes());
        out
    }

    pub fn map(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
        let mut out = head(5, entries.len() as u64);
        for (k, v) in entries {
            out.extend(text(k));
            out.extend_from_slice(v);
        }
        out
    }

    pub fn from_json(value: &serde_json::Value) -> Vec<u8> {
        use serde_json::Value as Json;
        match value {
            Json::Null => vec![0xf6],
            Json::Bool(false) => vec![0xf4],
            Json::Bool(true) => vec![0xf5],
            Json::Number(n) => {
                if let Some(u) = n.as_u64() {
                    uint(u)
                } else if let Some(i) = n.as_i64() {
                    head(1, (-1 - i) as u64)
                } else {
                    let mut out = vec![0xfb];
                    out.extend_from_slice(&n.as_f64().unwrap().to_bits().to_be_bytes());
                    out
                }
            }
            Json::String(s) => text(s),
            Json::Array(items) => {
                let mut out = head(4, items.len() as u64);
                for item in items {
                    out.extend(from_json(item));
                }
                out
            }
            Json::Object(entries) => {
                let mut out = head(5, entries.len() as u64);
                for (k, v) in entries {
                    out.extend(text(k));
                    out.extend(from_json(v));
                }
                out
            }
        }
    }
}

/// Build a commit frame as the upstream would encode it.
pub fn commit_frame(
    did: &str,
    seq: u64,
    collection: &str,
    rkey: &str,
    rev: &str,
    operation: &str,
    record: Option<&serde_json::Value>,
) -> Vec<u8> {
    let mut commit = vec![
        ("rev", cbor::text(rev)),
        ("operation", cbor::text(operation)),
        ("collection", cbor::text(collection)),
        ("rkey", cbor::text(rkey)),
    ];
    if let Some(record) = record {
        commit.push(("record", cbor::from_json(record)));
    }
    cbor::map(&[
        ("did", cbor::text(did)),
        ("seq", cbor::uint(seq)),
        ("kind", cbor::text("commit")),
        ("commit", cbor::map(&commit)),
    ])
}

/// A post create frame referencing a scene parent.
pub fn post_frame(did: &str, seq: u64, rkey: &str, rev: &str) -> Vec<u8> {
    commit_frame(
        did,
        seq,
        "app.gather.post",
        rkey,
        rev,
        "create",
        Some(&serde_json::json!({
            "text": "see you there",
            "scene": "at://did:plc:host/app.gather.scene/main"
        })),
    )
}

// ─── Scripted transport ──────────────────────────────────────────────────────

/// One delivery in a scripted session.
pub enum Item {
    Frame(Vec<u8>),
    /// Yield a transport error (mid-stream drop).
    Fail,
}

struct CountingStream {
    items: VecDeque<Item>,
    hang: bool,
    frames_read: Arc<AtomicUsize>,
}

impl Stream for CountingStream {
    type Item = Result<Bytes, TransportError>;

    fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.items.pop_front() {
            Some(Item::Frame(bytes)) => {
                self.frames_read.fetch_add(1, Ordering::SeqCst);
                Poll::Ready(Some(Ok(Bytes::from(bytes))))
            }
            Some(Item::Fail) => Poll::Ready(Some(Err(TransportError::Closed))),
            None if self.hang => Poll::Pending,
            None => Poll::Ready(None),
        }
    }
}

/// Transport that replays scripted sessions. Each `subscribe` consumes
/// the next session; the requested cursor is recorded for assertions.
pub struct ScriptedTransport {
    sessions: Mutex<VecDeque<(Vec<Item>, bool)>>,
    pub cursors: Mutex<Vec<Option<u64>>>,
    pub frames_read: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(VecDeque::new()),
            cursors: Mutex::new(Vec::new()),
            frames_read: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Add a session that delivers `items` and then hangs (stays open).
    pub fn session_hang(self, items: Vec<Item>) -> Self {
        self.sessions.lock().unwrap().push_back((items, true));
        self
    }

    /// Add a session that delivers `items` and then ends.
    pub fn session(self, items: Vec<Item>) -> Self {
        self.sessions.lock().unwrap().push_back((items, false));
        self
    }

    pub fn recorded_cursors(&self) -> Vec<Option<u64>> {
        self.cursors.lock().unwrap().clone()
    }
}

#[async_trait]
impl FrameTransport for ScriptedTransport {
    async fn subscribe(&self, cursor: Option<u64>) -> Result<FrameStream, TransportError> {
        self.cursors.lock().unwrap().push(cursor);
        // Out of scripted sessions: stay connected delivering nothing.
        let (items, hang) = self
            .sessions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or((vec![], true));
        Ok(Box::pin(CountingStream {
            items: items.into(),
            hang,
            frames_read: Arc::clone(&self.frames_read),
        }))
    }

    fn endpoint(&self) -> &str {
        "scripted://test"
    }
}

// ─── Gated repository ────────────────────────────────────────────────────────

/// Repository wrapper whose writes block until permits are released —
/// a synthetic slow consumer for backpressure tests.
pub struct GatedRepo {
    pub inner: Arc<InMemoryStorage>,
    gate: tokio::sync::Semaphore,
}

impl GatedRepo {
    pub fn new(inner: Arc<InMemoryStorage>) -> Self {
        Self {
            inner,
            gate: tokio::sync::Semaphore::new(0),
        }
    }

    pub fn release(&self, permits: usize) {
        self.gate.add_permits(permits);
    }

    async fn wait(&self) {
        self.gate
            .acquire()
            .await
            .expect("gate semaphore closed")
            .forget();
    }
}

#[async_trait]
impl EntityRepository for GatedRepo {
    async fn upsert(
        &self,
        entity: &DomainEntity,
        key: &IdempotencyKey,
    ) -> Result<WriteOutcome, StorageError> {
        self.wait().await;
        self.inner.upsert(entity, key).await
    }

    async fn soft_delete(
        &self,
        owner: &str,
        collection: Collection,
        rkey: &str,
        rev: &str,
        key: &IdempotencyKey,
    ) -> Result<WriteOutcome, StorageError> {
        self.wait().await;
        self.inner.soft_delete(owner, collection, rkey, rev, key).await
    }
}

/// Repository that always fails with a transient error.
pub struct AlwaysTransientRepo;

#[async_trait]
impl EntityRepository for AlwaysTransientRepo {
    async fn upsert(
        &self,
        _entity: &DomainEntity,
        _key: &IdempotencyKey,
    ) -> Result<WriteOutcome, StorageError> {
        Err(StorageError::Transient("synthetic outage".into()))
    }

    async fn soft_delete(
        &self,
        _owner: &str,
        _collection: Collection,
        _rkey: &str,
        _rev: &str,
        _key: &IdempotencyKey,
    ) -> Result<WriteOutcome, StorageError> {
        Err(StorageError::Transient("synthetic outage".into()))
    }
}

// ─── Polling helper ──────────────────────────────────────────────────────────

/// Poll `condition` until it holds or the timeout elapses.
pub async fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
