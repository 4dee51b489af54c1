//! FFmpeg progress parsing.
//!
//! FFmpeg writes `key=value` lines to the `-progress` pipe, one block per
//! update, each block terminated by `progress=continue` or `progress=end`.

use serde::{Deserialize, Serialize};

/// Snapshot of the encoder's progress stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EncodeProgress {
    /// Frames encoded so far
    pub frame: u64,
    pub fps: f64,
    /// kbit/s
    pub bitrate: f64,
    /// Bytes written so far
    pub total_size: u64,
    /// Elapsed output time, as reported
    pub out_time_ms: i64,
    /// Elapsed output time (HH:MM:SS.micro)
    pub out_time: String,
    pub dup_frames: u64,
    pub drop_frames: u64,
    /// Encoding speed, verbatim (e.g. `1.02x`)
    pub speed: String,
    /// Set once `progress=end` has been read
    pub is_complete: bool,
}

impl EncodeProgress {
    /// Apply one line of `-progress` output.
    ///
    /// Returns `true` when a recognised key was applied. Empty lines, lines
    /// without `=`, unknown keys and values that fail to parse leave the
    /// snapshot untouched.
    pub fn apply_line(&mut self, line: &str) -> bool {
        let Some((key, value)) = line.trim().split_once('=') else {
            return false;
        };
        let value = value.trim();

        match key.trim() {
            "frame" => set_parsed(&mut self.frame, value),
            "fps" => set_parsed(&mut self.fps, value),
            "bitrate" => set_parsed(&mut self.bitrate, value.trim_end_matches("kbits/s")),
            "total_size" => set_parsed(&mut self.total_size, value),
            "out_time_ms" => set_parsed(&mut self.out_time_ms, value),
            "out_time" => set_string(&mut self.out_time, value),
            "dup_frames" => set_parsed(&mut self.dup_frames, value),
            "drop_frames" => set_parsed(&mut self.drop_frames, value),
            "speed" => set_string(&mut self.speed, value),
            "progress" => match value {
                "end" => {
                    self.is_complete = true;
                    true
                }
                "continue" => true,
                _ => false,
            },
            _ => false,
        }
    }

    /// Percentage of `total_frames` encoded, rounded to two decimals.
    ///
    /// `None` when the total is unknown or zero.
    pub fn percentage(&self, total_frames: Option<u64>) -> Option<f64> {
        let total = total_frames.filter(|&t| t > 0)?;
        let pct = (self.frame as f64 / total as f64 * 100.0).clamp(0.0, 100.0);
        Some((pct * 100.0).round() / 100.0)
    }

    /// Speed as reported, or `None` before the encoder has reported one.
    pub fn speed(&self) -> Option<&str> {
        match self.speed.as_str() {
            "" | "N/A" => None,
            s => Some(s),
        }
    }
}

fn set_parsed<T: std::str::FromStr>(slot: &mut T, value: &str) -> bool {
    match value.trim().parse() {
        Ok(parsed) => {
            *slot = parsed;
            true
        }
        Err(_) => false,
    }
}

fn set_string(slot: &mut String, value: &str) -> bool {
    if value.is_empty() {
        return false;
    }
    *slot = value.to_string();
    true
}
