//! Byte counters for transfers.
//!
//! A transfer increments the counter from its own task while a reporter
//! samples it on a timer, so both sides only touch atomics.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;

/// Shared `bytes_transferred / total_bytes` snapshot.
#[derive(Debug, Default)]
pub struct TransferProgress {
    transferred: AtomicU64,
    total: AtomicU64,
}

impl TransferProgress {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    pub fn add(&self, bytes: u64) {
        self.transferred.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Percentage transferred, rounded to two decimals.
    ///
    /// `None` while the total is unknown.
    pub fn percent(&self) -> Option<f64> {
        let total = self.total();
        if total == 0 {
            return None;
        }
        let pct = (self.transferred() as f64 / total as f64 * 100.0).clamp(0.0, 100.0);
        Some((pct * 100.0).round() / 100.0)
    }
}

/// [`AsyncWrite`] adapter that counts bytes into a [`TransferProgress`].
pub struct ProgressWriter<W> {
    inner: W,
    progress: Arc<TransferProgress>,
}

impl<W> ProgressWriter<W> {
    pub fn new(inner: W, progress: Arc<TransferProgress>) -> Self {
        Self { inner, progress }
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for ProgressWriter<W> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let poll = Pin::new(&mut self.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = &poll {
            self.progress.add(*n as u64);
        }
        poll
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Blocking [`io::Read`] adapter that counts bytes, for the FTP driver.
pub struct ProgressReader<R> {
    inner: R,
    progress: Arc<TransferProgress>,
}

impl<R> ProgressReader<R> {
    pub fn new(inner: R, progress: Arc<TransferProgress>) -> Self {
        Self { inner, progress }
    }
}

impl<R: io::Read> io::Read for ProgressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.progress.add(n as u64);
        Ok(n)
    }
}

/// Human readable decimal byte count (`1.2 MB`).
pub fn format_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1000;
    if bytes < UNIT {
        return format!("{bytes} B");
    }
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    let prefix = ['k', 'M', 'G', 'T', 'P', 'E'][exp];
    format!("{:.1} {}B", bytes as f64 / div as f64, prefix)
}
