//! Job status and the pipeline state machine.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Pipeline status of a job.
///
/// `Queued` is the only initial state. `Completed`, `Error` and `Cancelled`
/// are terminal. `Restarting` is written by an external actor together with a
/// re-enqueue of the same job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is waiting for a worker
    #[default]
    Queued,
    /// Source is being fetched into local staging
    Downloading,
    /// Source streams are being inspected
    Probing,
    /// Encoder subprocess is running
    Encoding,
    /// Output is being pushed to the destination
    Uploading,
    /// All stages succeeded
    Completed,
    /// A stage failed
    Error,
    /// Cancelled during encoding
    Cancelled,
    /// Re-enqueued by an operator, will re-run from the top
    Restarting,
}

impl JobStatus {
    pub const ALL: [JobStatus; 9] = [
        JobStatus::Queued,
        JobStatus::Downloading,
        JobStatus::Probing,
        JobStatus::Encoding,
        JobStatus::Uploading,
        JobStatus::Completed,
        JobStatus::Error,
        JobStatus::Cancelled,
        JobStatus::Restarting,
    ];

    /// Get string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Downloading => "downloading",
            JobStatus::Probing => "probing",
            JobStatus::Encoding => "encoding",
            JobStatus::Uploading => "uploading",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Restarting => "restarting",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Error | JobStatus::Cancelled
        )
    }

    /// Whether a pipeline run may start from this status.
    pub fn is_startable(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Restarting)
    }

    /// Whether the pipeline may move a job from `self` to `next`.
    ///
    /// `Probing` is reachable straight from the start state when the source
    /// is streamed. `Cancelled` is only reachable from `Encoding`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;

        match (*self, next) {
            (Queued | Restarting, Downloading | Probing) => true,
            (Downloading, Probing) => true,
            (Probing, Encoding) => true,
            (Encoding, Uploading | Cancelled) => true,
            (Uploading, Completed) => true,
            (from, Error) => !from.is_terminal(),
            (from, Restarting) => from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Returned when a stored status string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job status: {0}")]
pub struct ParseStatusError(pub String);

impl FromStr for JobStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        JobStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == needle)
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}
