//! Shared data models for the encoding workers.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs and their pipeline status
//! - Encode records (probe output, options, progress)
//! - Presets
//! - Queue request payloads

pub mod encode;
pub mod job;
pub mod job_status;
pub mod preset;
pub mod request;

// Re-export common types
pub use encode::Encode;
pub use job::{Job, JobGuid};
pub use job_status::{JobStatus, ParseStatusError};
pub use preset::Preset;
pub use request::{EncodeRequest, RequestError};
