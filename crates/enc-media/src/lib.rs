//! FFmpeg and FFprobe wrapper for the encoding workers.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building
//! - Progress parsing from `-progress pipe:1`
//! - Cancellation and deadlines via tokio
//! - Stream probing
//! - Preset data to FFmpeg argument translation

pub mod command;
pub mod error;
pub mod options;
pub mod probe;
pub mod progress;
pub mod transcoder;

pub use command::{check_ffmpeg, check_ffprobe, version, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use options::EncoderOptions;
pub use probe::{ProbeResult, ProbeStream, Prober};
pub use progress::EncodeProgress;
pub use transcoder::{EncodeTask, FfmpegTranscoder, Transcoder};
