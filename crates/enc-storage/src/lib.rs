//! Storage transfer for encoding jobs.
//!
//! This crate provides:
//! - A [`StorageDriver`] seam with S3 and FTP implementations
//! - Byte-counted transfer progress
//! - Presigned source URLs for streaming
//! - Provider/region endpoint lookup

pub mod config;
pub mod driver;
pub mod endpoint;
pub mod error;
pub mod ftp;
pub mod location;
pub mod progress;
pub mod s3;

pub use config::StorageSettings;
pub use driver::{collect_files, DriverKind, StorageDriver, StorageEntry};
pub use endpoint::{endpoint_url, S3Provider};
pub use error::{StorageError, StorageResult};
pub use ftp::{FtpConfig, FtpDriver};
pub use location::Location;
pub use progress::{format_bytes, ProgressWriter, TransferProgress};
pub use s3::{S3Config, S3Driver, PRESIGNED_DURATION};
