//! Translation of preset data into FFmpeg output arguments.
//!
//! Preset data is a JSON document with `format`, `video`, `audio`, `filter`
//! and `raw` sections. A non-empty `raw` list replaces everything else.

use serde::{Deserialize, Serialize};

use crate::error::{MediaError, MediaResult};

/// Structured encoder options as stored on a preset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderOptions {
    pub format: FormatOptions,
    pub video: VideoOptions,
    pub audio: AudioOptions,
    pub filter: FilterOptions,
    /// Raw flag strings, split on whitespace
    pub raw: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatOptions {
    pub container: String,
    pub clip: bool,
    #[serde(rename = "startTime")]
    pub start_time: String,
    #[serde(rename = "stopTime")]
    pub stop_time: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoOptions {
    pub codec: String,
    pub preset: String,
    /// `crf` enables `-crf`; two-pass is not supported and runs as one pass
    pub pass: String,
    pub crf: u32,
    pub bitrate: String,
    pub minrate: String,
    pub maxrate: String,
    pub bufsize: String,
    pub pixel_format: String,
    pub frame_rate: String,
    pub speed: String,
    pub tune: String,
    pub profile: String,
    pub level: String,
    pub faststart: bool,
    pub size: String,
    pub width: String,
    pub height: String,
    pub format: String,
    pub aspect: String,
    pub scaling: String,
    pub codec_options: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioOptions {
    pub codec: String,
    pub channel: String,
    pub quality: String,
    pub sample_rate: String,
    pub volume: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterOptions {
    pub deband: bool,
    pub deshake: bool,
    pub deflicker: bool,
    pub dejudder: bool,
    pub denoise: String,
    pub deinterlace: String,
    pub brightness: String,
    pub contrast: String,
    pub saturation: String,
    pub gamma: String,
    pub acontrast: String,
}

/// True when `value` is set and not one of the "leave it alone" sentinels.
fn is_set(value: &str, sentinels: &[&str]) -> bool {
    let value = value.trim();
    !value.is_empty() && !sentinels.contains(&value)
}

fn push_flag(args: &mut Vec<String>, flag: &str, value: &str) {
    args.push(flag.to_string());
    args.push(value.trim().to_string());
}

impl EncoderOptions {
    /// Decode preset data. Data stored as a JSON string is decoded twice.
    pub fn from_preset_data(data: &serde_json::Value) -> MediaResult<Self> {
        let parsed = match data {
            serde_json::Value::String(text) => serde_json::from_str(text),
            serde_json::Value::Null => Ok(Self::default()),
            other => serde_json::from_value(other.clone()),
        };
        parsed.map_err(|e| MediaError::invalid_options(e.to_string()))
    }

    /// FFmpeg arguments placed between the input and the output path.
    pub fn to_args(&self) -> Vec<String> {
        let raw: Vec<String> = self
            .raw
            .iter()
            .flat_map(|flags| flags.split_whitespace())
            .map(String::from)
            .collect();
        if !raw.is_empty() {
            return raw;
        }

        let mut args = Vec::new();

        if self.format.clip {
            args.extend(self.format_flags());
        }

        args.extend(self.video_flags());

        let vf = self.video_filters();
        if !vf.is_empty() {
            push_flag(&mut args, "-vf", &vf);
        }

        args.extend(self.audio_flags());

        let af = self.audio_filters();
        if !af.is_empty() {
            push_flag(&mut args, "-af", &af);
        }

        args
    }

    fn format_flags(&self) -> Vec<String> {
        let mut args = Vec::new();
        if is_set(&self.format.start_time, &[]) {
            push_flag(&mut args, "-ss", &self.format.start_time);
        }
        if is_set(&self.format.stop_time, &[]) {
            push_flag(&mut args, "-to", &self.format.stop_time);
        }
        args
    }

    fn video_flags(&self) -> Vec<String> {
        let v = &self.video;
        let mut args = Vec::new();

        if is_set(&v.codec, &[]) {
            push_flag(&mut args, "-c:v", &v.codec);
        }
        if is_set(&v.preset, &["none"]) {
            push_flag(&mut args, "-preset", &v.preset);
        }
        if v.crf != 0 && v.pass == "crf" {
            push_flag(&mut args, "-crf", &v.crf.to_string());
        }
        if v.faststart {
            push_flag(&mut args, "-movflags", "faststart");
        }
        for (flag, value) in [
            ("-b:v", &v.bitrate),
            ("-minrate", &v.minrate),
            ("-maxrate", &v.maxrate),
            ("-bufsize", &v.bufsize),
        ] {
            if is_set(value, &["0"]) {
                push_flag(&mut args, flag, value);
            }
        }
        if is_set(&v.pixel_format, &["auto"]) {
            push_flag(&mut args, "-pix_fmt", &v.pixel_format);
        }
        if is_set(&v.frame_rate, &["auto"]) {
            push_flag(&mut args, "-r", &v.frame_rate);
        }
        if is_set(&v.tune, &["none"]) {
            push_flag(&mut args, "-tune", &v.tune);
        }
        if is_set(&v.profile, &["none"]) {
            push_flag(&mut args, "-profile:v", &v.profile);
        }
        if is_set(&v.level, &["none"]) {
            push_flag(&mut args, "-level", &v.level);
        }
        if is_set(&v.codec_options, &[]) {
            if let Some(family) = v.codec.strip_prefix("lib").filter(|c| matches!(*c, "x264" | "x265")) {
                push_flag(&mut args, &format!("-{family}-params"), &v.codec_options);
            }
        }

        args
    }

    fn video_filters(&self) -> String {
        let v = &self.video;
        let f = &self.filter;
        let mut filters = Vec::new();

        if is_set(&v.speed, &["auto"]) {
            filters.push(format!("setpts={}", v.speed.trim()));
        }

        let mut scale = Vec::new();
        if is_set(&v.size, &["source"]) {
            scale.push(if v.size == "custom" {
                format!("scale={}:{}", v.width.trim(), v.height.trim())
            } else if v.format == "widescreen" {
                format!("scale={}:-1", v.size.trim())
            } else {
                format!("scale=-1:{}", v.size.trim())
            });
        }
        if is_set(&v.scaling, &["auto"]) {
            scale.push(format!("flags={}", v.scaling.trim()));
        }
        if !scale.is_empty() {
            filters.push(scale.join(":"));
        }

        for (enabled, name) in [
            (f.deband, "deband"),
            (f.deshake, "deshake"),
            (f.deflicker, "deflicker"),
            (f.dejudder, "dejudder"),
        ] {
            if enabled {
                filters.push(name.to_string());
            }
        }

        if is_set(&f.denoise, &["none"]) {
            filters.push(
                match f.denoise.trim() {
                    "light" => "removegrain=22",
                    "medium" => "vaguedenoiser=threshold=3:method=soft:nsteps=5",
                    "heavy" => "vaguedenoiser=threshold=6:method=soft:nsteps=5",
                    _ => "removegrain=0",
                }
                .to_string(),
            );
        }

        let yadif = match f.deinterlace.trim() {
            "frame" => Some("yadif=0:-1:0"),
            "field" => Some("yadif=1:-1:0"),
            "frame_nospatial" => Some("yadif=2:-1:0"),
            "field_nospatial" => Some("yadif=3:-1:0"),
            _ => None,
        };
        filters.extend(yadif.map(String::from));

        let eq: Vec<String> = [
            ("contrast", &f.contrast, "1"),
            ("brightness", &f.brightness, "0"),
            ("saturation", &f.saturation, "0"),
            ("gamma", &f.gamma, "0"),
        ]
        .into_iter()
        .filter(|(_, value, neutral)| is_set(value, &[*neutral]))
        .map(|(name, value, _)| format!("{name}={}", value.trim()))
        .collect();
        if !eq.is_empty() {
            filters.push(format!("eq={}", eq.join(":")));
        }

        filters.join(",")
    }

    fn audio_flags(&self) -> Vec<String> {
        let a = &self.audio;
        let mut args = Vec::new();

        if is_set(&a.codec, &[]) {
            push_flag(&mut args, "-c:a", &a.codec);
        }
        if is_set(&a.channel, &["source"]) {
            push_flag(&mut args, "-rematrix_maxval", "1.0");
            push_flag(&mut args, "-ac", &a.channel);
        }
        if is_set(&a.quality, &["auto"]) {
            push_flag(&mut args, "-b:a", &a.quality);
        }
        if is_set(&a.sample_rate, &["auto"]) {
            push_flag(&mut args, "-ar", &a.sample_rate);
        }

        args
    }

    fn audio_filters(&self) -> String {
        let mut filters = Vec::new();

        // Percentages on the preset, ratios for ffmpeg
        let ratio = |value: &str| value.trim().parse::<f64>().ok().map(|v| v / 100.0);

        if is_set(&self.audio.volume, &["100"]) {
            if let Some(volume) = ratio(&self.audio.volume) {
                filters.push(format!("volume={volume:.2}"));
            }
        }
        if is_set(&self.filter.acontrast, &["33"]) {
            if let Some(contrast) = ratio(&self.filter.acontrast) {
                filters.push(format!("acontrast={contrast:.2}"));
            }
        }

        filters.join(",")
    }
}
