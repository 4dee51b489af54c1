//! FFprobe stream inspection.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::error::{MediaError, MediaResult};

/// Parsed FFprobe output, together with the raw JSON it came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    /// Raw `-print_format json` output, persisted verbatim
    #[serde(skip)]
    pub raw: String,
    #[serde(default)]
    pub streams: Vec<ProbeStream>,
    pub format: Option<ProbeFormat>,
}

/// One stream as reported by FFprobe.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeStream {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub codec_type: String,
    pub codec_name: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub r_frame_rate: Option<String>,
    pub avg_frame_rate: Option<String>,
    /// Frame count; FFprobe reports it as a string, `"0"` when unknown
    pub nb_frames: Option<String>,
    pub duration: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeFormat {
    pub format_name: Option<String>,
    pub duration: Option<String>,
    pub size: Option<String>,
    pub bit_rate: Option<String>,
}

impl ProbeStream {
    pub fn is_video(&self) -> bool {
        self.codec_type == "video"
    }

    /// Frame rate in frames per second.
    pub fn frame_rate(&self) -> Option<f64> {
        self.avg_frame_rate
            .as_deref()
            .and_then(parse_frame_rate)
            .or_else(|| self.r_frame_rate.as_deref().and_then(parse_frame_rate))
    }

    /// Known, non-zero frame count.
    pub fn frame_count(&self) -> Option<u64> {
        self.nb_frames
            .as_deref()
            .and_then(|n| n.trim().parse::<u64>().ok())
            .filter(|&n| n > 0)
    }
}

impl ProbeResult {
    /// Parse FFprobe JSON output.
    pub fn from_json(raw: impl Into<String>) -> MediaResult<Self> {
        let raw = raw.into();
        let mut result: ProbeResult = serde_json::from_str(&raw)?;
        result.raw = raw;
        Ok(result)
    }

    /// First video stream, if any.
    pub fn video_stream(&self) -> Option<&ProbeStream> {
        self.streams.iter().find(|s| s.is_video())
    }

    /// Total frame count used to compute encode progress.
    ///
    /// Prefers the first video stream and falls back to any stream with a
    /// known count. `None` when every stream reports zero or nothing.
    pub fn total_frames(&self) -> Option<u64> {
        self.video_stream()
            .and_then(ProbeStream::frame_count)
            .or_else(|| self.streams.iter().find_map(ProbeStream::frame_count))
    }

    /// Container duration in seconds.
    pub fn duration(&self) -> Option<f64> {
        self.format
            .as_ref()
            .and_then(|f| f.duration.as_deref())
            .and_then(|d| d.parse().ok())
    }
}

/// Runs FFprobe against local paths or URLs.
#[derive(Debug, Clone)]
pub struct Prober {
    program: PathBuf,
    timeout: Option<Duration>,
}

impl Default for Prober {
    fn default() -> Self {
        Self::new()
    }
}

impl Prober {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("ffprobe"),
            timeout: None,
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the FFprobe arguments for `input`.
    pub fn build_args(input: &str) -> Vec<String> {
        [
            "-i",
            input,
            "-show_streams",
            "-show_format",
            "-print_format",
            "json",
            "-v",
            "quiet",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    /// Probe a local file or URL.
    pub async fn probe(&self, input: &str) -> MediaResult<ProbeResult> {
        if !input.contains("://") && !Path::new(input).exists() {
            return Err(MediaError::FileNotFound(PathBuf::from(input)));
        }

        which::which(&self.program)
            .map_err(|_| MediaError::FfprobeNotFound(self.program.display().to_string()))?;

        debug!("Probing {}", input);

        let output = Command::new(&self.program)
            .args(Self::build_args(input))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, output)
                .await
                .map_err(|_| MediaError::Timeout(timeout.as_secs()))??,
            None => output.await?,
        };

        if !output.status.success() {
            return Err(MediaError::ffprobe_failed(
                format!("ffprobe exited with {}", output.status),
                Some(String::from_utf8_lossy(&output.stderr).trim().to_string()),
            ));
        }

        let raw = String::from_utf8_lossy(&output.stdout).to_string();
        ProbeResult::from_json(raw).map_err(|e| MediaError::ffprobe_failed(e.to_string(), None))
    }
}

/// Parse frame rate string (e.g., "30/1" or "29.97").
fn parse_frame_rate(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den > 0.0 {
            return Some(num / den);
        }
        return None;
    }
    s.parse().ok().filter(|fps: &f64| *fps > 0.0)
}
