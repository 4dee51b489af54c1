//! Worker metrics.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use enc_models::JobStatus;

use crate::error::{WorkerError, WorkerResult};
use crate::pipeline::Stage;

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_STARTED_TOTAL: &str = "enc_jobs_started_total";
    /// Finished jobs by terminal status
    pub const JOBS_FINISHED_TOTAL: &str = "enc_jobs_finished_total";
    pub const JOBS_IN_FLIGHT: &str = "enc_jobs_in_flight";
    pub const STAGE_DURATION_SECONDS: &str = "enc_stage_duration_seconds";
    /// Bytes moved by direction (`download`, `upload`)
    pub const BYTES_TRANSFERRED_TOTAL: &str = "enc_bytes_transferred_total";
}

/// Serve metrics in Prometheus format on `addr`.
pub fn init_metrics(addr: &str) -> WorkerResult<()> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| WorkerError::config_error(format!("METRICS_ADDR {addr}: {e}")))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter: {e}")))
}

pub fn record_job_started() {
    counter!(names::JOBS_STARTED_TOTAL).increment(1);
}

pub fn record_job_finished(status: JobStatus) {
    counter!(names::JOBS_FINISHED_TOTAL, "status" => status.as_str()).increment(1);
}

pub fn set_jobs_in_flight(count: usize) {
    gauge!(names::JOBS_IN_FLIGHT).set(count as f64);
}

pub fn record_stage_duration(stage: Stage, duration_secs: f64) {
    histogram!(names::STAGE_DURATION_SECONDS, "stage" => stage.as_str()).record(duration_secs);
}

pub fn record_bytes_transferred(direction: &'static str, bytes: u64) {
    counter!(names::BYTES_TRANSFERRED_TOTAL, "direction" => direction).increment(bytes);
}
