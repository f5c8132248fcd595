//! JetIndex metrics definitions.
//!
//! All metrics use OpenTelemetry conventions.
//! They can be exported via OTLP to Prometheus, Grafana, Datadog, etc.

use opentelemetry::{
    metrics::{Counter, Histogram, Meter},
    KeyValue,
};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{metrics::SdkMeterProvider, runtime, Resource};

/// Install an OTLP meter provider exporting to `endpoint` and make it the
/// global provider. Hold the returned provider for the process lifetime
/// and call `shutdown()` on exit to flush.
pub fn init_otlp_metrics(
    endpoint: &str,
    service_name: &str,
) -> Result<SdkMeterProvider, opentelemetry::metrics::MetricsError> {
    let provider = opentelemetry_otlp::new_pipeline()
        .metrics(runtime::Tokio)
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint),
        )
        .with_resource(Resource::new([KeyValue::new(
            "service.name",
            service_name.to_string(),
        )]))
        .build()?;
    opentelemetry::global::set_meter_provider(provider.clone());
    Ok(provider)
}

/// Central metrics handle for the ingestion pipeline.
#[derive(Clone)]
pub struct IndexerMetrics {
    pub frames_processed: Counter<u64>,
    pub decode_errors: Counter<u64>,
    pub filter_rejects: Counter<u64>,
    pub mapping_errors: Counter<u64>,
    pub upserts_applied: Counter<u64>,
    pub duplicates: Counter<u64>,
    pub backpressure_pauses: Counter<u64>,
    pub backpressure_resumes: Counter<u64>,
    pub backpressure_stalls: Counter<u64>,
    pub reconnect_attempts: Counter<u64>,
    pub reconnect_successes: Counter<u64>,
    pub permanent_write_failures: Counter<u64>,
    pub record_latency_ms: Histogram<f64>,
    pub processing_lag_ms: Histogram<f64>,
}

impl IndexerMetrics {
    pub fn new(meter: &Meter) -> Self {
        Self {
            frames_processed: meter
                .u64_counter("jetindex.frames_processed")
                .with_description("Total frames read from the transport")
                .init(),
            decode_errors: meter
                .u64_counter("jetindex.decode_errors")
                .with_description("Frames that failed to decode (dropped, never retried)")
                .init(),
            filter_rejects: meter
                .u64_counter("jetindex.filter_rejects")
                .with_description("Commits rejected by the filter, tagged by reason")
                .init(),
            mapping_errors: meter
                .u64_counter("jetindex.mapping_errors")
                .with_description("Commits that passed the filter but failed mapping")
                .init(),
            upserts_applied: meter
                .u64_counter("jetindex.upserts_applied")
                .with_description("Entity writes that committed and became visible")
                .init(),
            duplicates: meter
                .u64_counter("jetindex.duplicates")
                .with_description("Writes skipped because the idempotency marker existed")
                .init(),
            backpressure_pauses: meter
                .u64_counter("jetindex.backpressure_pauses")
                .with_description("Transitions into the paused flow state")
                .init(),
            backpressure_resumes: meter
                .u64_counter("jetindex.backpressure_resumes")
                .with_description("Transitions back into the flowing state")
                .init(),
            backpressure_stalls: meter
                .u64_counter("jetindex.backpressure_stalls")
                .with_description("Pause episodes that exceeded the stall alert duration")
                .init(),
            reconnect_attempts: meter
                .u64_counter("jetindex.reconnect_attempts")
                .with_description("Transport reconnection attempts")
                .init(),
            reconnect_successes: meter
                .u64_counter("jetindex.reconnect_successes")
                .with_description("Transport reconnections that reached streaming")
                .init(),
            permanent_write_failures: meter
                .u64_counter("jetindex.permanent_write_failures")
                .with_description("Writes that failed permanently (never retried)")
                .init(),
            record_latency_ms: meter
                .f64_histogram("jetindex.record_latency_ms")
                .with_description("Per-record processing time in milliseconds")
                .init(),
            processing_lag_ms: meter
                .f64_histogram("jetindex.processing_lag_ms")
                .with_description("Now minus event timestamp in milliseconds")
                .init(),
        }
    }

    /// A metrics handle backed by the global meter. With no provider
    /// installed this records nothing, which keeps tests quiet.
    pub fn global() -> Self {
        Self::new(&opentelemetry::global::meter("jetindex"))
    }

    pub fn record_reject(&self, reason: &'static str) {
        self.filter_rejects.add(1, &[KeyValue::new("reason", reason)]);
    }

    pub fn record_upsert(&self, collection: &str) {
        self.upserts_applied
            .add(1, &[KeyValue::new("collection", collection.to_string())]);
    }

    pub fn record_latency(&self, ms: f64) {
        self.record_latency_ms.record(ms, &[]);
    }

    pub fn record_lag(&self, ms: f64) {
        self.processing_lag_ms.record(ms, &[]);
    }
}
