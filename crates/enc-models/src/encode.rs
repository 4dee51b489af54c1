//! Encode record, the one-to-one child of a job.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Probe output, resolved options and progress for a job.
///
/// Created alongside the job with empty values. The pipeline fills in
/// `probe` and `options`; the progress reporter owns `progress`, `speed` and
/// `fps`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Encode {
    pub id: i64,
    pub job_id: i64,
    /// Raw prober JSON
    pub probe: Option<String>,
    /// Resolved encoder arguments, JSON encoded
    pub options: Option<String>,
    /// 0-100, unset until the first tick
    pub progress: Option<f64>,
    /// Encoder speed, verbatim (e.g. `1.02x`)
    pub speed: Option<String>,
    pub fps: Option<f64>,
}

impl Encode {
    pub fn new(id: i64, job_id: i64) -> Self {
        Self {
            id,
            job_id,
            ..Default::default()
        }
    }
}
