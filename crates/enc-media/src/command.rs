//! FFmpeg command builder and runner.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};
use crate::progress::EncodeProgress;

/// Longest stderr tail attached to an encode failure.
const STDERR_TAIL_BYTES: usize = 4096;

/// FFmpeg diagnostics verbosity; only errors reach stderr.
const LOG_LEVEL: &str = "error";

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input path or URL
    input: String,
    /// Output file path
    output: PathBuf,
    /// Output arguments (after -i)
    output_args: Vec<String>,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl Into<String>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.into(),
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
        }
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-y".to_string(),
            "-loglevel".to_string(),
            LOG_LEVEL.to_string(),
        ];

        // Machine-readable progress on stdout, diagnostics stay on stderr
        args.push("-progress".to_string());
        args.push("pipe:1".to_string());

        args.push("-i".to_string());
        args.push(self.input.clone());

        args.extend(self.output_args.iter().cloned());

        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Runner for FFmpeg commands with progress tracking and cancellation.
///
/// Progress lines are parsed as they arrive and published on a
/// [`watch`] channel, so the reader task is the only writer of the snapshot.
pub struct FfmpegRunner {
    /// Executable to launch
    program: PathBuf,
    /// Cancellation signal receiver
    cancel_rx: Option<watch::Receiver<bool>>,
    /// Deadline for the whole run
    timeout: Option<Duration>,
    /// Set before the subprocess is killed on cancellation
    cancelled: Arc<AtomicBool>,
}

impl Default for FfmpegRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegRunner {
    /// Create a new runner for `ffmpeg` on `PATH`.
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            cancel_rx: None,
            timeout: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Use a specific executable.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Set cancellation signal.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    /// Set timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Whether the last run was killed by a cancellation request.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Run an FFmpeg command, publishing progress on `progress_tx`.
    pub async fn run(
        &self,
        cmd: &FfmpegCommand,
        progress_tx: &watch::Sender<EncodeProgress>,
    ) -> MediaResult<()> {
        self.run_args(&cmd.build_args(), progress_tx).await
    }

    /// Run the configured program with raw arguments.
    pub async fn run_args(
        &self,
        args: &[String],
        progress_tx: &watch::Sender<EncodeProgress>,
    ) -> MediaResult<()> {
        which::which(&self.program)
            .map_err(|_| MediaError::FfmpegNotFound(self.program.display().to_string()))?;

        self.cancelled.store(false, Ordering::SeqCst);
        debug!("Running {} {}", self.program.display(), args.join(" "));

        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::ffmpeg_failed("stdout not captured", None, None))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::ffmpeg_failed("stderr not captured", None, None))?;

        // Line reader: sole writer of the progress snapshot
        let tx = progress_tx.clone();
        let progress_handle = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tx.send_if_modified(|progress| progress.apply_line(&line));
            }
        });

        let stderr_handle = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = BufReader::new(stderr).read_to_end(&mut buf).await;
            String::from_utf8_lossy(&buf).trim().to_string()
        });

        let result = self.wait_for_completion(&mut child).await;

        // Pipes close when the process exits, so both readers finish
        let _ = progress_handle.await;
        let stderr = stderr_handle.await.unwrap_or_default();

        let status = result?;

        if self.is_cancelled() {
            return Err(MediaError::Cancelled);
        }

        if status.success() {
            Ok(())
        } else {
            Err(MediaError::ffmpeg_failed(
                format!("{} exited with {}", self.program.display(), status),
                Some(tail(&stderr, STDERR_TAIL_BYTES)).filter(|s| !s.is_empty()),
                status.code(),
            ))
        }
    }

    /// Wait for child process with cancellation and timeout.
    async fn wait_for_completion(&self, child: &mut Child) -> MediaResult<ExitStatus> {
        let mut cancel_rx = self.cancel_rx.clone();
        let deadline = self.timeout.map(|t| tokio::time::Instant::now() + t);

        loop {
            if cancel_rx.as_ref().is_some_and(|rx| *rx.borrow()) {
                info!("Cancellation requested, killing {}", self.program.display());
                self.cancelled.store(true, Ordering::SeqCst);
                if let Err(e) = child.start_kill() {
                    warn!("Failed to kill process: {}", e);
                }
                return Ok(child.wait().await?);
            }

            tokio::select! {
                status = child.wait() => return Ok(status?),
                changed = cancel_changed(&mut cancel_rx) => {
                    if changed.is_err() {
                        // Sender gone: nobody can cancel any more
                        cancel_rx = None;
                    }
                }
                _ = sleep_until(deadline) => {
                    let secs = self.timeout.map(|t| t.as_secs()).unwrap_or_default();
                    warn!("{} timed out after {} seconds, killing process", self.program.display(), secs);
                    let _ = child.kill().await;
                    return Err(MediaError::Timeout(secs));
                }
            }
        }
    }
}

async fn cancel_changed(
    rx: &mut Option<watch::Receiver<bool>>,
) -> Result<(), watch::error::RecvError> {
    match rx {
        Some(rx) => rx.changed().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn tail(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    s[start..].to_string()
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg(program: impl AsRef<Path>) -> MediaResult<PathBuf> {
    let program = program.as_ref();
    which::which(program).map_err(|_| MediaError::FfmpegNotFound(program.display().to_string()))
}

/// Check if FFprobe is available.
pub fn check_ffprobe(program: impl AsRef<Path>) -> MediaResult<PathBuf> {
    let program = program.as_ref();
    which::which(program).map_err(|_| MediaError::FfprobeNotFound(program.display().to_string()))
}

/// First line of `<program> -version`.
pub async fn version(program: impl AsRef<Path>) -> MediaResult<String> {
    let output = Command::new(program.as_ref())
        .arg("-version")
        .stdin(Stdio::null())
        .output()
        .await?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout.lines().next().unwrap_or_default().trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[test]
    fn test_command_builder() {
        let cmd = FfmpegCommand::new("input.mov", "/tmp/job/dst/out.mp4")
            .output_args(["-c:v", "libx264"])
            .output_arg("-crf")
            .output_arg("23");

        let args = cmd.build_args();
        assert_eq!(
            args,
            vec![
                "-hide_banner", "-y", "-loglevel", "error", "-progress", "pipe:1", "-i",
                "input.mov", "-c:v", "libx264", "-crf", "23", "/tmp/job/dst/out.mp4",
            ]
        );
    }

    #[test]
    fn test_command_builder_url_input() {
        let args = FfmpegCommand::new("https://bucket.example.com/in.mov?sig=1", "out.mp4")
            .build_args();

        let input_pos = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[input_pos + 1], "https://bucket.example.com/in.mov?sig=1");
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
    }

    #[test]
    fn test_tail() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("ab", 3), "ab");
        assert_eq!(tail("aé", 1), "");
    }

    #[tokio::test]
    async fn test_runner_publishes_progress() {
        let (tx, rx) = watch::channel(EncodeProgress::default());
        let runner = FfmpegRunner::new().with_program("sh");

        runner
            .run_args(
                &sh("printf 'frame=120\\nfps=29.5\\nbitrate=1200.0kbits/s\\nprogress=continue\\nprogress=end\\n'"),
                &tx,
            )
            .await
            .unwrap();

        let progress = rx.borrow().clone();
        assert_eq!(progress.frame, 120);
        assert!((progress.fps - 29.5).abs() < f64::EPSILON);
        assert!((progress.bitrate - 1200.0).abs() < f64::EPSILON);
        assert!(progress.is_complete);
    }

    #[tokio::test]
    async fn test_runner_reports_exit_code_and_stderr() {
        let (tx, _rx) = watch::channel(EncodeProgress::default());
        let runner = FfmpegRunner::new().with_program("sh");

        let err = runner
            .run_args(&sh("echo 'Invalid data found' >&2; exit 3"), &tx)
            .await
            .unwrap_err();

        match err {
            MediaError::FfmpegFailed {
                stderr, exit_code, ..
            } => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(stderr.as_deref(), Some("Invalid data found"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!runner.is_cancelled());
    }

    #[tokio::test]
    async fn test_runner_cancel_kills_process() {
        let (tx, _rx) = watch::channel(EncodeProgress::default());
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let runner = FfmpegRunner::new().with_program("sh").with_cancel(cancel_rx);

        let cancel = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let _ = cancel_tx.send(true);
            cancel_tx
        });

        let started = std::time::Instant::now();
        let err = runner
            .run_args(&sh("echo frame=1; exec sleep 30"), &tx)
            .await
            .unwrap_err();

        assert!(matches!(err, MediaError::Cancelled));
        assert!(runner.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(10));
        let _ = cancel.await;
    }

    #[tokio::test]
    async fn test_runner_cancel_before_start() {
        let (tx, _rx) = watch::channel(EncodeProgress::default());
        let (_cancel_tx, cancel_rx) = watch::channel(true);
        let runner = FfmpegRunner::new().with_program("sh").with_cancel(cancel_rx);

        let err = runner.run_args(&sh("exec sleep 30"), &tx).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_runner_timeout() {
        let (tx, _rx) = watch::channel(EncodeProgress::default());
        let runner = FfmpegRunner::new()
            .with_program("sh")
            .with_timeout(Duration::from_millis(200));

        let err = runner.run_args(&sh("exec sleep 30"), &tx).await.unwrap_err();
        assert!(matches!(err, MediaError::Timeout(_)));
        assert!(!runner.is_cancelled());
    }

    #[tokio::test]
    async fn test_runner_missing_program() {
        let (tx, _rx) = watch::channel(EncodeProgress::default());
        let runner = FfmpegRunner::new().with_program("definitely-not-ffmpeg-xyz");
        let err = runner.run_args(&[], &tx).await.unwrap_err();
        assert!(matches!(err, MediaError::FfmpegNotFound(_)));
    }

    #[tokio::test]
    #[ignore = "requires ffmpeg"]
    async fn test_ffmpeg_version() {
        check_ffmpeg("ffmpeg").unwrap();
        let version = version("ffmpeg").await.unwrap();
        assert!(version.starts_with("ffmpeg version"));
    }
}
