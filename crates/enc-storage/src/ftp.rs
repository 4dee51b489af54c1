//! FTP storage driver.
//!
//! The FTP client is blocking, so each operation opens its own control
//! connection on the blocking pool and quits when done. Progress is counted
//! per 4 KiB chunk; there is no finer granularity.

use async_trait::async_trait;
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use suppaftp::list::File as ListEntry;
use suppaftp::{FtpError, FtpStream, Mode};
use tracing::{debug, info, warn};

use crate::driver::{collect_files, file_name, DriverKind, StorageDriver, StorageEntry};
use crate::error::{StorageError, StorageResult};
use crate::location::Location;
use crate::progress::{format_bytes, ProgressReader, TransferProgress};

const CHUNK_SIZE: usize = 4 * 1024;
const DEFAULT_PORT: u16 = 21;

/// Connection details for the FTP driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpConfig {
    /// `host` or `host:port`
    pub addr: String,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
}

impl FtpConfig {
    pub fn new(
        addr: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            addr: addr.into(),
            username: username.into(),
            password: password.into(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn socket_addr(&self) -> StorageResult<SocketAddr> {
        let addr = self
            .addr
            .trim()
            .trim_start_matches("ftp://")
            .trim_end_matches('/');
        let addr = if addr.rsplit_once(':').is_some_and(|(_, port)| port.parse::<u16>().is_ok()) {
            addr.to_string()
        } else {
            format!("{addr}:{DEFAULT_PORT}")
        };

        addr.to_socket_addrs()
            .map_err(|e| StorageError::config_error(format!("{addr}: {e}")))?
            .next()
            .ok_or_else(|| StorageError::config_error(format!("{addr}: no address")))
    }

    fn connect(&self) -> StorageResult<FtpStream> {
        let mut stream = FtpStream::connect_timeout(self.socket_addr()?, self.timeout)?;
        stream.login(&self.username, &self.password)?;
        stream.set_mode(Mode::Passive);
        Ok(stream)
    }
}

/// Storage driver over a plain FTP server.
#[derive(Debug, Clone)]
pub struct FtpDriver {
    config: Arc<FtpConfig>,
}

impl FtpDriver {
    pub fn new(config: FtpConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Run `op` against a fresh, logged-in connection on the blocking pool.
    async fn with_connection<T, F>(&self, op: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut FtpStream) -> StorageResult<T> + Send + 'static,
    {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || {
            let mut stream = config.connect()?;
            let result = op(&mut stream);
            if let Err(e) = stream.quit() {
                debug!(error = %e, "FTP quit failed");
            }
            result
        })
        .await
        .map_err(|e| StorageError::Ftp(format!("FTP task failed: {e}")))?
    }
}

fn remote_path(location: &str) -> StorageResult<String> {
    Ok(Location::parse(location)?.path)
}

fn copy_chunks(
    reader: &mut dyn Read,
    writer: &mut impl Write,
    progress: &TransferProgress,
) -> io::Result<u64> {
    let mut buf = [0u8; CHUNK_SIZE];
    let mut written = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buf[..n])?;
        written += n as u64;
        progress.add(n as u64);
    }
    writer.flush()?;
    Ok(written)
}

#[async_trait]
impl StorageDriver for FtpDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Ftp
    }

    async fn download(
        &self,
        source: &str,
        local_path: &Path,
        progress: Arc<TransferProgress>,
    ) -> StorageResult<u64> {
        let remote = remote_path(source)?;
        let local: PathBuf = local_path.to_path_buf();
        info!(remote = %remote, "Starting FTP download");

        let result = self
            .with_connection({
                let local = local.clone();
                move |stream| {
                    // SIZE is optional on some servers; progress stays unknown without it
                    if let Ok(size) = stream.size(&remote) {
                        progress.set_total(size as u64);
                    }

                    let mut file = File::create(&local)?;
                    let written = stream.retr(&remote, |reader| {
                        copy_chunks(reader, &mut file, &progress).map_err(FtpError::ConnectionError)
                    })?;
                    Ok(written)
                }
            })
            .await;

        match result {
            Ok(written) => {
                debug!(written = %format_bytes(written), "FTP download complete");
                Ok(written)
            }
            Err(e) => {
                warn!(path = %local.display(), "Download failed, removing partial file");
                let _ = tokio::fs::remove_file(&local).await;
                Err(StorageError::download_failed(e.to_string()))
            }
        }
    }

    async fn upload(
        &self,
        local_dir: &Path,
        destination: &str,
        progress: Arc<TransferProgress>,
    ) -> StorageResult<Vec<String>> {
        let location = Location::parse(destination)?;
        let files = collect_files(local_dir)?;
        progress.set_total(files.iter().map(|(_, size)| size).sum());

        let mut targets = Vec::with_capacity(files.len());
        for (path, size) in files {
            let remote = location.join(file_name(&path)?);
            info!(remote = %remote, size = %format_bytes(size), "Uploading to FTP");
            targets.push((path, remote));
        }

        self.with_connection(move |stream| {
            let mut uploaded = Vec::with_capacity(targets.len());
            for (path, remote) in targets {
                let file = BufReader::with_capacity(CHUNK_SIZE, File::open(&path)?);
                let mut reader = ProgressReader::new(file, progress.clone());
                stream
                    .put_file(&remote, &mut reader)
                    .map_err(|e| StorageError::upload_failed(format!("{remote}: {e}")))?;
                uploaded.push(remote);
            }
            Ok(uploaded)
        })
        .await
    }

    async fn list_files(&self, prefix: &str) -> StorageResult<Vec<StorageEntry>> {
        let prefix = prefix.trim().to_string();

        let lines = self
            .with_connection(move |stream| {
                let path = (!prefix.is_empty()).then_some(prefix.as_str());
                stream
                    .list(path)
                    .map_err(|e| StorageError::ListFailed(e.to_string()))
            })
            .await?;

        Ok(parse_listing(&lines))
    }
}

/// Parse `LIST` output, skipping lines that are not entries.
fn parse_listing(lines: &[String]) -> Vec<StorageEntry> {
    lines
        .iter()
        .filter_map(|line| ListEntry::from_str(line).ok())
        .filter(|entry| !matches!(entry.name(), "." | ".."))
        .map(|entry| {
            if entry.is_directory() {
                StorageEntry::Directory {
                    name: entry.name().to_string(),
                }
            } else {
                StorageEntry::File {
                    name: entry.name().to_string(),
                    size: entry.size() as u64,
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_unix_listing() {
        let lines: Vec<String> = [
            "total 12",
            "drwxr-xr-x    2 ftp      ftp          4096 Mar 01 12:00 videos",
            "-rw-r--r--    1 ftp      ftp       1048576 Mar 01 12:01 in.mov",
            "drwxr-xr-x    2 ftp      ftp          4096 Mar 01 12:00 .",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let entries = parse_listing(&lines);
        assert_eq!(
            entries,
            vec![
                StorageEntry::Directory {
                    name: "videos".into()
                },
                StorageEntry::File {
                    name: "in.mov".into(),
                    size: 1048576
                },
            ]
        );
    }

    #[test]
    fn test_copy_chunks_counts_progress() {
        let progress = TransferProgress::default();
        let data = vec![1u8; CHUNK_SIZE * 2 + 100];
        let mut out = Vec::new();

        let written = copy_chunks(&mut data.as_slice(), &mut out, &progress).unwrap();
        assert_eq!(written, data.len() as u64);
        assert_eq!(progress.transferred(), data.len() as u64);
        assert_eq!(out, data);
    }

    #[test]
    fn test_socket_addr_default_port() {
        let config = FtpConfig::new("127.0.0.1", "u", "p");
        assert_eq!(config.socket_addr().unwrap().port(), 21);

        let config = FtpConfig::new("ftp://127.0.0.1:2121/", "u", "p");
        assert_eq!(config.socket_addr().unwrap().port(), 2121);
    }

    #[test]
    fn test_remote_path() {
        assert_eq!(remote_path("ftp://host/in/a.mov").unwrap(), "/in/a.mov");
        assert_eq!(remote_path("in/a.mov").unwrap(), "in/a.mov");
    }

    #[tokio::test]
    async fn test_connection_refused_is_error() {
        let driver = FtpDriver::new(
            FtpConfig::new("127.0.0.1:1", "u", "p").with_timeout(Duration::from_millis(200)),
        );
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("in.mov");

        let err = driver
            .download("in.mov", &local, TransferProgress::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::DownloadFailed(_)));
        assert!(!local.exists());
    }

    #[tokio::test]
    #[ignore = "requires an FTP server"]
    async fn test_list_live_server() {
        let driver = FtpDriver::new(FtpConfig::new(
            std::env::var("FTP_ADDR").unwrap(),
            std::env::var("FTP_USERNAME").unwrap(),
            std::env::var("FTP_PASSWORD").unwrap(),
        ));
        let entries = driver.list_files("/").await.unwrap();
        assert!(entries.iter().all(|e| !e.name().is_empty()));
    }
}
