//! Object storage endpoint lookup.

use std::fmt;
use std::str::FromStr;

use crate::error::{StorageError, StorageResult};

/// Object storage provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum S3Provider {
    AmazonAws,
    DigitalOceanSpaces,
    /// Endpoint supplied verbatim in settings
    Custom,
}

impl S3Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            S3Provider::AmazonAws => "amazon",
            S3Provider::DigitalOceanSpaces => "digitalocean",
            S3Provider::Custom => "custom",
        }
    }
}

impl fmt::Display for S3Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for S3Provider {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "amazon" | "aws" | "amazonaws" | "s3" => Ok(S3Provider::AmazonAws),
            "digitalocean" | "digitaloceanspaces" | "spaces" | "do" => {
                Ok(S3Provider::DigitalOceanSpaces)
            }
            "custom" => Ok(S3Provider::Custom),
            other => Err(StorageError::config_error(format!("unknown S3 provider: {other}"))),
        }
    }
}

/// Resolve the endpoint URL for `provider` in `region`.
///
/// `custom` is only consulted for [`S3Provider::Custom`], where it is required.
pub fn endpoint_url(
    provider: S3Provider,
    region: &str,
    custom: Option<&str>,
) -> StorageResult<String> {
    let region = region.trim();
    match provider {
        S3Provider::AmazonAws | S3Provider::DigitalOceanSpaces if region.is_empty() => Err(
            StorageError::config_error(format!("{provider} endpoint requires a region")),
        ),
        S3Provider::AmazonAws => Ok(format!("https://s3.{region}.amazonaws.com")),
        S3Provider::DigitalOceanSpaces => Ok(format!("https://{region}.digitaloceanspaces.com")),
        S3Provider::Custom => match custom.map(str::trim).filter(|c| !c.is_empty()) {
            Some(url) if url.contains("://") => Ok(url.trim_end_matches('/').to_string()),
            Some(host) => Ok(format!("https://{}", host.trim_end_matches('/'))),
            None => Err(StorageError::config_error("custom provider requires an endpoint")),
        },
    }
}
