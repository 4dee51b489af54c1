//! Named encode profiles.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A named, reusable set of encoder options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Preset {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Structured encoder options, interpreted by the media layer
    pub data: serde_json::Value,
    /// Output file name placed under the job's `dst` directory
    pub output: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Preset {
    pub fn new(name: impl Into<String>, output: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            data,
            output: output.into(),
            active: true,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_defaults() {
        let preset: Preset = serde_json::from_str(
            r#"{"name":"web-720p","data":{"video":{"codec":"libx264"}},"output":"out.mp4"}"#,
        )
        .unwrap();
        assert!(preset.active);
        assert!(preset.description.is_empty());
        assert_eq!(preset.data["video"]["codec"], "libx264");
    }
}
