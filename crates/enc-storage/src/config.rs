//! Typed storage configuration resolved from settings keys.

use std::sync::Arc;

use crate::driver::{DriverKind, StorageDriver};
use crate::endpoint::S3Provider;
use crate::error::{StorageError, StorageResult};
use crate::ftp::{FtpConfig, FtpDriver};
use crate::s3::{S3Config, S3Driver};

/// Settings keys read by [`StorageSettings::from_lookup`].
pub mod keys {
    pub const STORAGE_DRIVER: &str = "STORAGE_DRIVER";
    pub const S3_PROVIDER: &str = "S3_PROVIDER";
    pub const S3_REGION: &str = "S3_REGION";
    pub const S3_ENDPOINT: &str = "S3_ENDPOINT";
    pub const AWS_ACCESS_KEY: &str = "AWS_ACCESS_KEY";
    pub const AWS_SECRET_KEY: &str = "AWS_SECRET_KEY";
    pub const S3_INBOUND_BUCKET: &str = "S3_INBOUND_BUCKET";
    pub const S3_OUTBOUND_BUCKET: &str = "S3_OUTBOUND_BUCKET";
    pub const FTP_ADDR: &str = "FTP_ADDR";
    pub const FTP_USERNAME: &str = "FTP_USERNAME";
    pub const FTP_PASSWORD: &str = "FTP_PASSWORD";

    pub const ALL: [&str; 11] = [
        STORAGE_DRIVER,
        S3_PROVIDER,
        S3_REGION,
        S3_ENDPOINT,
        AWS_ACCESS_KEY,
        AWS_SECRET_KEY,
        S3_INBOUND_BUCKET,
        S3_OUTBOUND_BUCKET,
        FTP_ADDR,
        FTP_USERNAME,
        FTP_PASSWORD,
    ];
}

/// The single active storage backend and its credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageSettings {
    S3(S3Config),
    Ftp(FtpConfig),
}

impl StorageSettings {
    /// Resolve from a key lookup. Blank values count as missing.
    pub fn from_lookup<F>(get: F) -> StorageResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &str| {
            value(key).ok_or_else(|| StorageError::config_error(format!("{key} is not set")))
        };

        let driver = value(keys::STORAGE_DRIVER).unwrap_or_else(|| "s3".to_string());
        match driver.to_ascii_lowercase().as_str() {
            "s3" => {
                let provider: S3Provider = value(keys::S3_PROVIDER).unwrap_or_default().parse()?;
                let config = S3Config::new(
                    provider,
                    value(keys::S3_REGION).unwrap_or_default(),
                    value(keys::S3_ENDPOINT).as_deref(),
                    required(keys::AWS_ACCESS_KEY)?,
                    required(keys::AWS_SECRET_KEY)?,
                )?
                // Unset buckets fall back to the host of each s3:// location
                .with_buckets(
                    value(keys::S3_INBOUND_BUCKET).unwrap_or_default(),
                    value(keys::S3_OUTBOUND_BUCKET).unwrap_or_default(),
                );
                Ok(Self::S3(config))
            }
            "ftp" => Ok(Self::Ftp(FtpConfig::new(
                required(keys::FTP_ADDR)?,
                required(keys::FTP_USERNAME)?,
                value(keys::FTP_PASSWORD).unwrap_or_default(),
            ))),
            other => Err(StorageError::config_error(format!(
                "unknown storage driver: {other}"
            ))),
        }
    }

    pub fn kind(&self) -> DriverKind {
        match self {
            StorageSettings::S3(_) => DriverKind::S3,
            StorageSettings::Ftp(_) => DriverKind::Ftp,
        }
    }

    /// Build the driver for these settings.
    pub fn connect(&self) -> Arc<dyn StorageDriver> {
        match self {
            StorageSettings::S3(config) => Arc::new(S3Driver::new(config.clone())),
            StorageSettings::Ftp(config) => Arc::new(FtpDriver::new(config.clone())),
        }
    }
}
