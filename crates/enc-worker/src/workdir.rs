//! Per-job local staging directories.
//!
//! Layout: `<work_dir>/<guid>/src/` holds the downloaded source and
//! `<work_dir>/<guid>/dst/` the encoder output. Keying on the guid keeps two
//! jobs from ever sharing a directory.

use std::path::{Component, Path, PathBuf};

use enc_models::JobGuid;
use tracing::debug;

use crate::error::{WorkerError, WorkerResult};

#[derive(Debug, Clone)]
pub struct JobWorkspace {
    root: PathBuf,
}

impl JobWorkspace {
    pub fn new(work_dir: &Path, guid: &JobGuid) -> Self {
        Self {
            root: work_dir.join(guid.as_str()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn src_dir(&self) -> PathBuf {
        self.root.join("src")
    }

    pub fn dst_dir(&self) -> PathBuf {
        self.root.join("dst")
    }

    /// Create `src/` and `dst/`.
    pub async fn create(&self) -> WorkerResult<()> {
        tokio::fs::create_dir_all(self.src_dir()).await?;
        tokio::fs::create_dir_all(self.dst_dir()).await?;
        debug!(path = %self.root.display(), "Created job workspace");
        Ok(())
    }

    /// Local path for the downloaded source.
    pub fn source_path(&self, file_name: &str) -> WorkerResult<PathBuf> {
        Ok(self.src_dir().join(relative(file_name)?))
    }

    /// Encoder output path for a preset's output template.
    pub fn output_path(&self, output: &str) -> WorkerResult<PathBuf> {
        Ok(self.dst_dir().join(relative(output)?))
    }

    /// Remove the whole workspace. Missing is not an error.
    pub async fn remove(&self) -> WorkerResult<()> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => {
                debug!(path = %self.root.display(), "Removed job workspace");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(WorkerError::CleanupFailed(format!(
                "{}: {e}",
                self.root.display()
            ))),
        }
    }
}

/// `name` as a path that stays inside its parent directory.
fn relative(name: &str) -> WorkerResult<&Path> {
    let path = Path::new(name.trim());
    let inside = path.components().count() > 0
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if inside {
        Ok(path)
    } else {
        Err(WorkerError::invalid_job(format!("path escapes workspace: {name}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_layout_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let guid = JobGuid::from_string("job-1");
        let ws = JobWorkspace::new(dir.path(), &guid);

        ws.create().await.unwrap();
        assert!(ws.src_dir().is_dir());
        assert!(ws.dst_dir().is_dir());
        assert_eq!(ws.source_path("in.mov").unwrap(), dir.path().join("job-1/src/in.mov"));
        assert_eq!(
            ws.output_path("720p/out.mp4").unwrap(),
            dir.path().join("job-1/dst/720p/out.mp4")
        );

        tokio::fs::write(ws.dst_dir().join("out.mp4"), b"data").await.unwrap();
        ws.remove().await.unwrap();
        assert!(!ws.root().exists());

        // Second removal is a no-op
        ws.remove().await.unwrap();
    }

    #[test]
    fn test_rejects_escaping_paths() {
        let ws = JobWorkspace::new(Path::new("/tmp/enc"), &JobGuid::from_string("g"));
        assert!(ws.output_path("../../etc/passwd").is_err());
        assert!(ws.output_path("/abs/out.mp4").is_err());
        assert!(ws.output_path("").is_err());
        assert!(ws.source_path("in.mov").is_ok());
    }
}
