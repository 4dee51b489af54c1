//! Worker error types.

use enc_models::JobStatus;
use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Probe failed: {0}")]
    ProbeFailed(String),

    #[error("Encode failed: {0}")]
    EncodeFailed(String),

    #[error("Encode cancelled")]
    EncodeCancelled,

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Cleanup failed: {0}")]
    CleanupFailed(String),

    #[error("Notification failed: {0}")]
    NotifyFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid job: {0}")]
    InvalidJob(String),

    /// The worker is shutting down; the job was left for another worker.
    #[error("Interrupted by shutdown")]
    Interrupted,

    #[error("Store error: {0}")]
    Store(#[from] enc_store::StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] enc_queue::QueueError),

    #[error("Storage error: {0}")]
    Storage(#[from] enc_storage::StorageError),

    #[error("Media error: {0}")]
    Media(#[from] enc_media::MediaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn download_failed(msg: impl std::fmt::Display) -> Self {
        Self::DownloadFailed(msg.to_string())
    }

    pub fn probe_failed(msg: impl std::fmt::Display) -> Self {
        Self::ProbeFailed(msg.to_string())
    }

    pub fn encode_failed(msg: impl std::fmt::Display) -> Self {
        Self::EncodeFailed(msg.to_string())
    }

    pub fn upload_failed(msg: impl std::fmt::Display) -> Self {
        Self::UploadFailed(msg.to_string())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_job(msg: impl Into<String>) -> Self {
        Self::InvalidJob(msg.into())
    }

    /// Map an encoder failure, keeping cancellation distinct.
    pub fn from_encode(err: enc_media::MediaError) -> Self {
        match err {
            enc_media::MediaError::Cancelled => Self::EncodeCancelled,
            enc_media::MediaError::FfmpegFailed {
                message,
                stderr: Some(stderr),
                ..
            } if !stderr.trim().is_empty() => {
                Self::EncodeFailed(format!("{message}: {}", stderr.trim()))
            }
            other => Self::encode_failed(other),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, WorkerError::EncodeCancelled)
    }

    /// Terminal job status this failure leads to.
    pub fn terminal_status(&self) -> JobStatus {
        match self {
            WorkerError::EncodeCancelled => JobStatus::Cancelled,
            _ => JobStatus::Error,
        }
    }
}
