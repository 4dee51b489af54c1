//! Structured job logging utilities.
//!
//! Every line carries the job guid and, where relevant, the pipeline stage,
//! so a single job can be followed through a busy worker's output.

use std::time::Duration;

use enc_models::JobGuid;
use tracing::{error, info, warn, Span};

use crate::pipeline::Stage;

/// Job logger for structured logging with consistent formatting.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_guid: String,
}

impl JobLogger {
    pub fn new(guid: &JobGuid) -> Self {
        Self {
            job_guid: guid.to_string(),
        }
    }

    pub fn stage_started(&self, stage: Stage) {
        info!(
            job_guid = %self.job_guid,
            stage = %stage,
            "Stage started"
        );
    }

    pub fn stage_completed(&self, stage: Stage, elapsed: Duration) {
        info!(
            job_guid = %self.job_guid,
            stage = %stage,
            elapsed_ms = elapsed.as_millis() as u64,
            "Stage completed"
        );
    }

    pub fn stage_failed(&self, stage: Stage, err: &dyn std::fmt::Display) {
        error!(
            job_guid = %self.job_guid,
            stage = %stage,
            error = %err,
            "Stage failed"
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(job_guid = %self.job_guid, "Job warning: {}", message);
    }

    pub fn log_completion(&self, message: &str) {
        info!(job_guid = %self.job_guid, "Job finished: {}", message);
    }

    pub fn job_guid(&self) -> &str {
        &self.job_guid
    }

    /// Span covering one pipeline run.
    pub fn create_span(&self) -> Span {
        tracing::info_span!("job", job_guid = %self.job_guid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_logger_creation() {
        let guid = JobGuid::from_string("test-job-123");
        let logger = JobLogger::new(&guid);
        assert_eq!(logger.job_guid(), "test-job-123");

        // No subscriber installed: logging is a no-op
        logger.stage_started(Stage::Download);
        logger.stage_failed(Stage::Download, &"boom");
    }
}
