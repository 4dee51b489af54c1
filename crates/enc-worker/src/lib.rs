//! Encoding worker.
//!
//! This crate provides:
//! - The job pipeline (download, probe, encode, upload, cleanup, notify)
//! - A bounded worker pool fed by the Redis job stream
//! - Progress reporters and cancellation polling
//! - Webhook notifications and Prometheus metrics

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod notify;
pub mod pipeline;
pub mod reporter;
pub mod workdir;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::{handle_delivery, JobSource, RedisJobSource, WorkerPool};
pub use logging::JobLogger;
pub use notify::{Notification, WebhookNotifier};
pub use pipeline::{DriverFactory, Pipeline, PipelineConfig, SettingsDrivers, Stage};
pub use workdir::JobWorkspace;
