//! Persistence for the encoding workers.
//!
//! This crate provides:
//! - Repository traits per aggregate (jobs, encodes, presets, settings)
//! - A Redis-backed store and an in-process store
//! - Typed worker settings resolved from string keys

pub mod error;
pub mod memory;
pub mod metrics;
pub mod redis_store;
pub mod repos;
pub mod settings;

pub use error::{StoreError, StoreResult};
pub use memory::{MemoryStore, ProgressWrite};
pub use redis_store::{RedisStore, StoreConfig};
pub use repos::{EncodeRepository, JobRepository, PresetRepository, SettingsRepository, Store};
pub use settings::WorkerSettings;
