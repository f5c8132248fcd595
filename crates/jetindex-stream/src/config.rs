//! Connector configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use jetindex_core::backpressure::BackpressureConfig;
use jetindex_core::retry::{RetryConfig, RetryPolicy};
use jetindex_core::types::Collection;

/// Configuration for a connector instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Firehose WebSocket endpoint, e.g. "wss://jetstream.example/subscribe"
    pub endpoint: String,

    /// Unique name for this indexer (used for cursor keys).
    #[serde(default = "default_indexer_id")]
    pub indexer_id: String,

    /// Collection NSIDs requested from the upstream.
    #[serde(default = "default_collections")]
    pub collections: Vec<String>,

    /// Queue depth at which transport reads pause.
    #[serde(default = "default_pause_at")]
    pub pause_at: usize,

    /// Queue depth at which transport reads resume.
    #[serde(default = "default_resume_at")]
    pub resume_at: usize,

    /// Continuous pause duration (seconds) before a stall alert.
    #[serde(default = "default_max_paused_secs")]
    pub max_paused_secs: u64,

    /// Initial reconnect backoff in milliseconds.
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,

    /// Maximum reconnect backoff in milliseconds.
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,

    /// Maximum reconnect attempts; `None` = retry forever.
    #[serde(default)]
    pub reconnect_max_retries: Option<u32>,

    /// Maximum transient-persistence retries per record before the
    /// indexer reports unhealthy.
    #[serde(default = "default_persistence_max_retries")]
    pub persistence_max_retries: u32,

    /// Initial persistence retry backoff in milliseconds.
    #[serde(default = "default_persistence_initial_ms")]
    pub persistence_initial_ms: u64,

    /// Number of processing tasks draining the queue.
    #[serde(default = "default_processors")]
    pub processors: usize,
}

fn default_indexer_id() -> String {
    "jetindex".to_string()
}
fn default_collections() -> Vec<String> {
    Collection::all().iter().map(|c| c.nsid().to_string()).collect()
}
fn default_pause_at() -> usize {
    1_000
}
fn default_resume_at() -> usize {
    100
}
fn default_max_paused_secs() -> u64 {
    30
}
fn default_reconnect_initial_ms() -> u64 {
    500
}
fn default_reconnect_max_ms() -> u64 {
    60_000
}
fn default_persistence_max_retries() -> u32 {
    5
}
fn default_persistence_initial_ms() -> u64 {
    500
}
fn default_processors() -> usize {
    1
}

impl ConnectorConfig {
    /// Create a config for a single endpoint with defaults everywhere else.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            indexer_id: default_indexer_id(),
            collections: default_collections(),
            pause_at: default_pause_at(),
            resume_at: default_resume_at(),
            max_paused_secs: default_max_paused_secs(),
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            reconnect_max_retries: None,
            persistence_max_retries: default_persistence_max_retries(),
            persistence_initial_ms: default_persistence_initial_ms(),
            processors: default_processors(),
        }
    }

    pub fn backpressure(&self) -> BackpressureConfig {
        BackpressureConfig {
            pause_at: self.pause_at,
            resume_at: self.resume_at,
            max_paused: Duration::from_secs(self.max_paused_secs),
        }
    }

    pub fn reconnect_policy(&self) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_retries: self.reconnect_max_retries,
            initial_backoff: Duration::from_millis(self.reconnect_initial_ms),
            max_backoff: Duration::from_millis(self.reconnect_max_ms),
            multiplier: 2.0,
            jitter_fraction: 0.1,
        })
    }

    pub fn persistence_policy(&self) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_retries: Some(self.persistence_max_retries),
            initial_backoff: Duration::from_millis(self.persistence_initial_ms),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_fraction: 0.1,
        })
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
