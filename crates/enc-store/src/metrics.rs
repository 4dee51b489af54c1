//! Store metrics.

use metrics::{counter, histogram};

/// Metric name constants for consistency.
pub mod names {
    /// Store operations by operation name and outcome.
    pub const REQUESTS_TOTAL: &str = "enc_store_requests_total";

    /// Store operation latency in seconds by operation.
    pub const LATENCY_SECONDS: &str = "enc_store_latency_seconds";
}

/// Record metrics for a completed store operation.
pub fn record_request(operation: &'static str, ok: bool, latency_ms: f64) {
    counter!(
        names::REQUESTS_TOTAL,
        "operation" => operation,
        "status" => if ok { "ok" } else { "error" }
    )
    .increment(1);

    histogram!(names::LATENCY_SECONDS, "operation" => operation).record(latency_ms / 1000.0);
}
