//! Metrics and observability utilities
//!
//! Prometheus-style metrics with standardized naming conventions.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all Folio metrics
pub const METRICS_PREFIX: &str = "folio";

/// Histogram buckets for request latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s, request timeout
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Blob store metrics
    describe_counter!(
        format!("{}_blob_writes_total", METRICS_PREFIX),
        Unit::Count,
        "Attachment writes by backend and status"
    );

    describe_counter!(
        format!("{}_blob_bytes_written_total", METRICS_PREFIX),
        Unit::Bytes,
        "Attachment bytes durably written"
    );

    describe_histogram!(
        format!("{}_blob_write_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Attachment write latency in seconds"
    );

    // Ingestion metrics
    describe_counter!(
        format!("{}_ingest_outcomes_total", METRICS_PREFIX),
        Unit::Count,
        "Article ingest requests by operation and terminal stage"
    );

    // Auth metrics
    describe_counter!(
        format!("{}_logins_total", METRICS_PREFIX),
        Unit::Count,
        "Login attempts by outcome"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Helper to record a blob write
pub fn record_blob_write(backend: &str, duration_secs: f64, size: usize, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_blob_writes_total", METRICS_PREFIX),
        "backend" => backend.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_blob_write_duration_seconds", METRICS_PREFIX),
        "backend" => backend.to_string()
    )
    .record(duration_secs);

    if success {
        counter!(
            format!("{}_blob_bytes_written_total", METRICS_PREFIX),
            "backend" => backend.to_string()
        )
        .increment(size as u64);
    }
}

/// Helper to record where an ingest request ended
pub fn record_ingest(operation: &str, stage: &str) {
    counter!(
        format!("{}_ingest_outcomes_total", METRICS_PREFIX),
        "operation" => operation.to_string(),
        "stage" => stage.to_string()
    )
    .increment(1);
}

/// Helper to record a login attempt
pub fn record_login(success: bool) {
    let outcome = if success { "success" } else { "rejected" };
    counter!(
        format!("{}_logins_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}
