//! Job definitions.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::JobStatus;

/// External identity of a job.
///
/// Generated at creation and used for every cross-component lookup instead of
/// the store's numeric id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobGuid(pub String);

impl JobGuid {
    /// Generate a new random guid.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobGuid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A request to turn `source` into an encoded file at `destination`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    /// Store-internal numeric id
    pub id: i64,
    pub guid: JobGuid,
    /// Name of the preset to encode with
    pub preset: String,
    /// Location string interpreted by the active storage driver
    pub source: String,
    /// Location string interpreted by the active storage driver
    pub destination: String,
    pub status: JobStatus,
    pub created_date: DateTime<Utc>,
    /// Id of the one-to-one [`crate::Encode`] record
    pub encode_id: i64,
}

impl Job {
    /// Create a queued job with a fresh guid.
    pub fn new(
        preset: impl Into<String>,
        source: impl Into<String>,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            guid: JobGuid::new(),
            preset: preset.into(),
            source: source.into(),
            destination: destination.into(),
            status: JobStatus::Queued,
            created_date: Utc::now(),
            encode_id: 0,
        }
    }

    pub fn with_guid(mut self, guid: JobGuid) -> Self {
        self.guid = guid;
        self
    }

    /// Base name of the source location, used as the staged file name.
    ///
    /// Query strings and fragments are not part of the name.
    pub fn source_file_name(&self) -> &str {
        let path = self
            .source
            .split(['?', '#'])
            .next()
            .unwrap_or(&self.source);
        path.trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or("source")
    }
}
