//! Storage driver seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use crate::error::{StorageError, StorageResult};
use crate::progress::TransferProgress;

/// Kind of backend behind a [`StorageDriver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    S3,
    Ftp,
}

impl DriverKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverKind::S3 => "s3",
            DriverKind::Ftp => "ftp",
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A remote entry returned by [`StorageDriver::list_files`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageEntry {
    File { name: String, size: u64 },
    Directory { name: String },
}

impl StorageEntry {
    pub fn name(&self) -> &str {
        match self {
            StorageEntry::File { name, .. } | StorageEntry::Directory { name } => name,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, StorageEntry::Directory { .. })
    }

    /// Byte size, `None` for directories.
    pub fn size(&self) -> Option<u64> {
        match self {
            StorageEntry::File { size, .. } => Some(*size),
            StorageEntry::Directory { .. } => None,
        }
    }
}

/// Moves job files between a remote backend and local staging.
///
/// Transfers report bytes into the supplied [`TransferProgress`]; the caller
/// samples it. A transfer in flight cannot be interrupted.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    fn kind(&self) -> DriverKind;

    /// Fetch `source` into `local_path`. Returns the number of bytes written.
    async fn download(
        &self,
        source: &str,
        local_path: &Path,
        progress: Arc<TransferProgress>,
    ) -> StorageResult<u64>;

    /// Upload every regular file under `local_dir` to `destination` joined
    /// with the file's base name. Returns the remote paths written.
    async fn upload(
        &self,
        local_dir: &Path,
        destination: &str,
        progress: Arc<TransferProgress>,
    ) -> StorageResult<Vec<String>>;

    /// List entries directly under `prefix`.
    async fn list_files(&self, prefix: &str) -> StorageResult<Vec<StorageEntry>>;

    /// Whether [`StorageDriver::presigned_url`] is available.
    fn supports_presign(&self) -> bool {
        false
    }

    /// Time-limited unauthenticated URL to `source`.
    async fn presigned_url(&self, _source: &str) -> StorageResult<String> {
        Err(StorageError::Unsupported("presigned URLs"))
    }
}

/// Regular files under `dir` with their sizes, in path order.
pub fn collect_files(dir: &Path) -> StorageResult<Vec<(PathBuf, u64)>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| StorageError::upload_failed(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let size = entry
            .metadata()
            .map_err(|e| StorageError::upload_failed(e.to_string()))?
            .len();
        files.push((entry.into_path(), size));
    }
    Ok(files)
}

/// Base name of a local file as UTF-8.
pub(crate) fn file_name(path: &Path) -> StorageResult<&str> {
    path.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| StorageError::upload_failed(format!("invalid file name: {}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_files_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.mp4"), b"12345").unwrap();
        std::fs::create_dir(dir.path().join("thumbs")).unwrap();
        std::fs::write(dir.path().join("thumbs").join("a.jpg"), b"12").unwrap();
        std::fs::write(dir.path().join("a.m3u8"), b"").unwrap();

        let files = collect_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|(p, size)| (p.file_name().unwrap().to_str().unwrap().to_string(), *size))
            .collect();

        assert_eq!(
            names,
            vec![
                ("a.m3u8".to_string(), 0),
                ("b.mp4".to_string(), 5),
                ("a.jpg".to_string(), 2),
            ]
        );
    }

    #[test]
    fn test_collect_files_missing_dir() {
        tokio_test::assert_err!(collect_files(Path::new("/nonexistent/dst")));
    }

    #[test]
    fn test_entry_accessors() {
        let file = StorageEntry::File {
            name: "in.mov".into(),
            size: 42,
        };
        let dir = StorageEntry::Directory { name: "videos/".into() };
        assert_eq!(file.size(), Some(42));
        assert!(!file.is_dir());
        assert_eq!(dir.size(), None);
        assert!(dir.is_dir());
        assert_eq!(dir.name(), "videos/");
    }
}
