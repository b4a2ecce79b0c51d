//! Source file inspection.
//!
//! The scheduler only needs a file's duration and a description of each of its
//! streams to size tasks. [`MediaInspector`] is the seam; [`FfprobeInspector`]
//! shells out to `ffprobe`.

use std::path::Path;
use std::process::Command;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ClusterError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamKind {
    Video { frame_rate: f64 },
    Audio { channels: u16, sample_rate: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub index: u32,
    pub codec: Option<String>,
    pub kind: StreamKind,
}

impl StreamInfo {
    pub fn video(index: u32, frame_rate: f64) -> Self {
        Self {
            index,
            codec: None,
            kind: StreamKind::Video { frame_rate },
        }
    }

    pub fn audio(index: u32, channels: u16, sample_rate: u32) -> Self {
        Self {
            index,
            codec: None,
            kind: StreamKind::Audio {
                channels,
                sample_rate,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub duration_ms: u64,
    pub streams: Vec<StreamInfo>,
}

impl FileInfo {
    /// Frame rate of the first video stream, if the file has one.
    pub fn main_frame_rate(&self) -> Option<f64> {
        self.streams.iter().find_map(|s| match s.kind {
            StreamKind::Video { frame_rate } => Some(frame_rate),
            StreamKind::Audio { .. } => None,
        })
    }
}

pub trait MediaInspector: Send + Sync {
    fn inspect(&self, source: &Path) -> Result<FileInfo>;
}

/// Inspects files with the `ffprobe` binary.
#[derive(Debug, Clone)]
pub struct FfprobeInspector {
    ffprobe_path: String,
}

impl Default for FfprobeInspector {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

impl FfprobeInspector {
    pub fn new(ffprobe_path: impl Into<String>) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
        }
    }
}

impl MediaInspector for FfprobeInspector {
    fn inspect(&self, source: &Path) -> Result<FileInfo> {
        tracing::debug!(source = %source.display(), "Inspecting source file");

        let output = Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(source)
            .output()
            .map_err(|e| ClusterError::MediaInspection(format!("failed to run ffprobe: {e}")))?;

        if !output.status.success() {
            return Err(ClusterError::MediaInspection(format!(
                "ffprobe exited with {:?} for {}",
                output.status.code(),
                source.display()
            )));
        }

        parse_ffprobe_output(&output.stdout)
    }
}

/// Parse the JSON emitted by `ffprobe -print_format json -show_format -show_streams`.
pub fn parse_ffprobe_output(bytes: &[u8]) -> Result<FileInfo> {
    let root: Value = serde_json::from_slice(bytes)?;

    let duration_secs = root
        .pointer("/format/duration")
        .and_then(number_or_string)
        .ok_or_else(|| ClusterError::MediaInspection("missing format duration".to_string()))?;
    let duration_ms = (duration_secs * 1000.0).round() as u64;

    let mut streams = Vec::new();
    for raw in root
        .get("streams")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let index = raw.get("index").and_then(Value::as_u64).unwrap_or(0) as u32;
        let codec = raw
            .get("codec_name")
            .and_then(Value::as_str)
            .map(str::to_string);

        let kind = match raw.get("codec_type").and_then(Value::as_str) {
            Some("video") => {
                let frame_rate = raw
                    .get("r_frame_rate")
                    .and_then(Value::as_str)
                    .and_then(parse_fraction)
                    .unwrap_or(0.0);
                StreamKind::Video { frame_rate }
            }
            Some("audio") => {
                let channels = raw.get("channels").and_then(Value::as_u64).unwrap_or(2) as u16;
                let sample_rate = raw
                    .get("sample_rate")
                    .and_then(number_or_string)
                    .unwrap_or(44_100.0) as u32;
                StreamKind::Audio {
                    channels,
                    sample_rate,
                }
            }
            _ => continue,
        };

        streams.push(StreamInfo { index, codec, kind });
    }

    Ok(FileInfo {
        duration_ms,
        streams,
    })
}

fn number_or_string(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

// "30000/1001" -> 29.97
fn parse_fraction(raw: &str) -> Option<f64> {
    match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                None
            } else {
                Some(num / den)
            }
        }
        None => raw.trim().parse().ok(),
    }
}
