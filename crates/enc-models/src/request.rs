//! Queue payload for an encode job.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;
use validator::Validate;

use crate::JobGuid;

/// Argument keys carried on a queue message.
pub const ARG_GUID: &str = "guid";
pub const ARG_PRESET: &str = "preset";
pub const ARG_SOURCE: &str = "source";
pub const ARG_DESTINATION: &str = "destination";

/// Errors extracting a request from a flat argument map.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("malformed field {field}: {reason}")]
    MalformedField { field: &'static str, reason: String },

    #[error("invalid request: {0}")]
    Invalid(String),
}

/// Fields the worker needs to run one job, as enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct EncodeRequest {
    pub guid: JobGuid,
    #[validate(length(min = 1, max = 256))]
    pub preset: String,
    #[validate(length(min = 1, max = 2048))]
    pub source: String,
    #[validate(length(min = 1, max = 2048))]
    pub destination: String,
}

impl EncodeRequest {
    /// Flatten into the string map carried on the queue.
    pub fn to_args(&self) -> HashMap<String, String> {
        HashMap::from([
            (ARG_GUID.to_string(), self.guid.to_string()),
            (ARG_PRESET.to_string(), self.preset.clone()),
            (ARG_SOURCE.to_string(), self.source.clone()),
            (ARG_DESTINATION.to_string(), self.destination.clone()),
        ])
    }

    /// Extract and validate each field of a dequeued argument map.
    pub fn from_args(args: &HashMap<String, String>) -> Result<Self, RequestError> {
        let field = |name: &'static str| -> Result<String, RequestError> {
            match args.get(name).map(|v| v.trim()) {
                Some(value) if !value.is_empty() => Ok(value.to_string()),
                _ => Err(RequestError::MissingField(name)),
            }
        };

        let guid = field(ARG_GUID)?;
        Uuid::parse_str(&guid).map_err(|e| RequestError::MalformedField {
            field: ARG_GUID,
            reason: e.to_string(),
        })?;

        let request = Self {
            guid: JobGuid::from_string(guid),
            preset: field(ARG_PRESET)?,
            source: field(ARG_SOURCE)?,
            destination: field(ARG_DESTINATION)?,
        };
        request
            .validate()
            .map_err(|e| RequestError::Invalid(e.to_string()))?;

        Ok(request)
    }
}
