//! Transcoder seam used by the job pipeline.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;
use crate::probe::{ProbeResult, Prober};
use crate::progress::EncodeProgress;

/// One encoder invocation.
#[derive(Debug, Clone)]
pub struct EncodeTask {
    /// Local path or presigned URL
    pub input: String,
    pub output: PathBuf,
    /// Arguments between input and output
    pub args: Vec<String>,
}

impl EncodeTask {
    pub fn command(&self) -> FfmpegCommand {
        FfmpegCommand::new(self.input.clone(), &self.output).output_args(self.args.iter().cloned())
    }
}

/// Probes and encodes media.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Inspect the streams of `input`.
    async fn probe(&self, input: &str) -> MediaResult<ProbeResult>;

    /// Run the encoder, publishing progress on `progress_tx`.
    ///
    /// Setting `cancel_rx` to `true` kills the encoder and yields
    /// [`crate::MediaError::Cancelled`].
    async fn encode(
        &self,
        task: &EncodeTask,
        progress_tx: watch::Sender<EncodeProgress>,
        cancel_rx: watch::Receiver<bool>,
    ) -> MediaResult<()>;
}

/// [`Transcoder`] backed by the `ffmpeg` and `ffprobe` executables.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    timeout: Option<Duration>,
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            timeout: None,
        }
    }

    /// Bound every probe and encode by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn probe(&self, input: &str) -> MediaResult<ProbeResult> {
        let mut prober = Prober::new().with_program(&self.ffprobe);
        if let Some(timeout) = self.timeout {
            prober = prober.with_timeout(timeout);
        }
        prober.probe(input).await
    }

    async fn encode(
        &self,
        task: &EncodeTask,
        progress_tx: watch::Sender<EncodeProgress>,
        cancel_rx: watch::Receiver<bool>,
    ) -> MediaResult<()> {
        if let Some(parent) = task.output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut runner = FfmpegRunner::new()
            .with_program(&self.ffmpeg)
            .with_cancel(cancel_rx);
        if let Some(timeout) = self.timeout {
            runner = runner.with_timeout(timeout);
        }

        info!(output = %task.output.display(), "Starting encode");
        runner.run(&task.command(), &progress_tx).await
    }
}
