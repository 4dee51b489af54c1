//! Parsing of job source/destination strings.

use url::Url;

use crate::error::{StorageError, StorageResult};

/// A remote location: `s3://bucket/key`, `ftp://host/path` or a bare path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    /// Host component of a URL (the bucket for `s3://`)
    pub host: Option<String>,
    /// Decoded path, with its leading slash if it had one
    pub path: String,
}

impl Location {
    pub fn parse(raw: &str) -> StorageResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(StorageError::invalid_location("empty location"));
        }

        if !raw.contains("://") {
            return Ok(Self {
                host: None,
                path: raw.to_string(),
            });
        }

        let url = Url::parse(raw).map_err(|e| StorageError::invalid_location(format!("{raw}: {e}")))?;
        let path = urlencoding::decode(url.path())
            .map_err(|e| StorageError::invalid_location(format!("{raw}: {e}")))?
            .into_owned();

        Ok(Self {
            host: url.host_str().map(str::to_string).filter(|h| !h.is_empty()),
            path,
        })
    }

    /// Object key: the path without its leading slash.
    pub fn key(&self) -> &str {
        self.path.trim_start_matches('/')
    }

    /// Path of `file_name` placed under this location.
    pub fn join(&self, file_name: &str) -> String {
        if self.path.is_empty() || self.path.ends_with('/') {
            format!("{}{}", self.path, file_name)
        } else {
            format!("{}/{}", self.path, file_name)
        }
    }
}
