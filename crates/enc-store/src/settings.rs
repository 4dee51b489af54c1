//! Typed worker settings resolved once per job.

use std::collections::HashMap;

use enc_storage::{config::keys as storage_keys, StorageSettings};
use tracing::debug;

use crate::error::StoreResult;
use crate::repos::SettingsRepository;

/// Settings keys owned by the worker itself.
pub mod keys {
    pub const STREAMING: &str = "STREAMING";
    pub const SLACK_WEBHOOK: &str = "SLACK_WEBHOOK";
}

/// Settings for one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSettings {
    pub storage: StorageSettings,
    /// Read the source through a presigned URL instead of downloading it
    pub streaming: bool,
    /// Notification webhook, if configured
    pub webhook: Option<String>,
}

impl WorkerSettings {
    /// Read every known key from `repo` and resolve them.
    pub async fn load<S>(repo: &S) -> StoreResult<Self>
    where
        S: SettingsRepository + ?Sized,
    {
        let mut values = HashMap::new();
        let all = storage_keys::ALL
            .into_iter()
            .chain([keys::STREAMING, keys::SLACK_WEBHOOK]);
        for key in all {
            if let Some(value) = repo.get_setting(key).await? {
                values.insert(key, value);
            }
        }
        debug!(keys = values.len(), "Loaded worker settings");

        Self::from_lookup(|key| values.get(key).cloned())
    }

    pub fn from_lookup<F>(get: F) -> StoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let storage = StorageSettings::from_lookup(&get)?;
        let streaming = get(keys::STREAMING).is_some_and(|v| parse_flag(&v));
        let webhook = get(keys::SLACK_WEBHOOK)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        Ok(Self {
            storage,
            streaming,
            webhook,
        })
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "enabled" | "1"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use enc_storage::DriverKind;

    async fn ftp_store() -> MemoryStore {
        let store = MemoryStore::new();
        store.set_setting(storage_keys::STORAGE_DRIVER, "ftp").await;
        store.set_setting(storage_keys::FTP_ADDR, "127.0.0.1:21").await;
        store.set_setting(storage_keys::FTP_USERNAME, "encoder").await;
        store
    }

    #[tokio::test]
    async fn test_load_defaults() {
        let store = ftp_store().await;
        let settings = WorkerSettings::load(&store).await.unwrap();
        assert_eq!(settings.storage.kind(), DriverKind::Ftp);
        assert!(!settings.streaming);
        assert_eq!(settings.webhook, None);
    }

    #[tokio::test]
    async fn test_load_streaming_and_webhook() {
        let store = ftp_store().await;
        store.set_setting(keys::STREAMING, "Enabled").await;
        store
            .set_setting(keys::SLACK_WEBHOOK, " https://hooks.example.com/x ")
            .await;

        let settings = WorkerSettings::load(&store).await.unwrap();
        assert!(settings.streaming);
        assert_eq!(settings.webhook.as_deref(), Some("https://hooks.example.com/x"));
    }

    #[tokio::test]
    async fn test_missing_storage_is_error() {
        let store = MemoryStore::new();
        tokio_test::assert_err!(WorkerSettings::load(&store).await);
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("true"));
        assert!(parse_flag("1"));
        assert!(parse_flag("ENABLED"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag("yes"));
        assert!(!parse_flag(""));
    }
}
