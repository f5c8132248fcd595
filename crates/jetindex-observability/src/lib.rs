//! # jetindex-observability
//!
//! OpenTelemetry-based observability for JetIndex.
//!
//! ## Built-in metrics
//! - `jetindex.frames_processed`         — counter
//! - `jetindex.decode_errors`            — counter
//! - `jetindex.filter_rejects`           — counter, tagged with reason
//! - `jetindex.mapping_errors`           — counter
//! - `jetindex.upserts_applied`          — counter, tagged with collection
//! - `jetindex.duplicates`               — counter
//! - `jetindex.backpressure_pauses`      — counter
//! - `jetindex.backpressure_resumes`     — counter
//! - `jetindex.backpressure_stalls`      — counter
//! - `jetindex.reconnect_attempts`       — counter
//! - `jetindex.reconnect_successes`      — counter
//! - `jetindex.permanent_write_failures` — counter
//! - `jetindex.record_latency_ms`        — histogram
//! - `jetindex.processing_lag_ms`        — histogram
//!
//! ## Structured logging
//! JSON-structured logs compatible with ELK, Loki, CloudWatch.
//! Log levels configurable per component.

pub mod metrics;
pub mod tracing_setup;

pub use metrics::{init_otlp_metrics, IndexerMetrics};
pub use tracing_setup::{init_tracing, LogConfig};
