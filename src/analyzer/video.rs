//! Video scoring by frame sampling
//!
//! Up to ten frames are pulled from the first 30 seconds with `ffmpeg`, each
//! is scored as a still image, and the per-frame confidences are combined:
//!
//! ```text
//! ffprobe ──→ VideoInfo ──→ frame_times ──→ ffmpeg (PNG pipe) ──→ score_frame
//!                                                                     │
//!                                              verdict_from_frames ◀──┘
//! ```
//!
//! Frames that agree with each other (confidence variance below 100) earn a
//! 10 point bonus on the mean. The verdict is `mean > 50`.

use super::{stats, still, FeatureSet, Verdict, MAX_CONFIDENCE};
use crate::config::MediaTools;
use crate::error::AnalysisError;
use image::{ImageFormat, ImageReader, RgbImage};
use serde::Deserialize;
use std::io::Cursor;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::{debug, warn};

pub const MAX_FRAMES: usize = 10;
/// Only the start of the clip is sampled
pub const MAX_SAMPLED_SECS: f64 = 30.0;
pub const CONSISTENCY_VARIANCE: f64 = 100.0;
pub const CONSISTENCY_BONUS: f64 = 10.0;
const AI_CONFIDENCE_THRESHOLD: f64 = 50.0;

/// What `ffprobe` reports about the first video stream
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    /// Seconds, 0.0 when unknown
    pub duration: f64,
    /// Frames per second, 0.0 when unknown
    pub fps: f64,
    pub width: u32,
    pub height: u32,
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    duration: Option<String>,
}

#[derive(Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// `"30000/1001"` or `"25"` to frames per second; `0/0` and junk give None
fn parse_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num.trim().parse::<f64>().ok()? / den
        }
        None => rate.trim().parse().ok()?,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}

fn parse_seconds(value: Option<&str>) -> Option<f64> {
    value
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
}

/// Parse `ffprobe -of json` output.
///
/// Container duration is preferred over stream duration; average frame
/// rate over the nominal one.
pub fn parse_probe(json: &[u8]) -> Result<VideoInfo, AnalysisError> {
    let output: ProbeOutput = serde_json::from_slice(json)?;
    let stream = output
        .streams
        .into_iter()
        .next()
        .ok_or(AnalysisError::Empty("no video stream found"))?;

    let duration = parse_seconds(output.format.as_ref().and_then(|f| f.duration.as_deref()))
        .or_else(|| parse_seconds(stream.duration.as_deref()))
        .unwrap_or(0.0);
    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_rate))
        .unwrap_or(0.0);

    Ok(VideoInfo {
        duration,
        fps,
        width: stream.width.unwrap_or(0),
        height: stream.height.unwrap_or(0),
    })
}

fn run_tool(tool: &'static str, program: &Path, args: &[&str]) -> Result<Vec<u8>, AnalysisError> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| AnalysisError::Tool { tool, message: e.to_string() })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = match stderr.trim() {
            "" => format!("exited with {}", output.status),
            msg => msg.to_string(),
        };
        return Err(AnalysisError::Tool { tool, message });
    }
    Ok(output.stdout)
}

pub fn probe(path: &Path, ffprobe: &Path) -> Result<VideoInfo, AnalysisError> {
    let path_arg = path.to_string_lossy();
    let stdout = run_tool(
        "ffprobe",
        ffprobe,
        &[
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height,r_frame_rate,avg_frame_rate,duration:format=duration",
            "-of",
            "json",
            &path_arg,
        ],
    )?;
    parse_probe(&stdout)
}

/// Sample timestamps in seconds.
///
/// `min(10, floor(duration))` points spread evenly over
/// `[0, min(duration, 30)]`, both ends included, none later than the start
/// of the last frame.
pub fn frame_times(duration: f64, fps: f64) -> Vec<f64> {
    if !duration.is_finite() || duration < 1.0 {
        return vec![];
    }
    let count = (duration.floor() as usize).min(MAX_FRAMES);
    let end = duration.min(MAX_SAMPLED_SECS);
    let latest = if fps > 0.0 { (duration - 1.0 / fps).max(0.0) } else { duration };

    (0..count)
        .map(|i| {
            let t = if count == 1 { 0.0 } else { end * i as f64 / (count - 1) as f64 };
            t.min(latest)
        })
        .collect()
}

/// Decode the frame at `seconds` through a lossless PNG pipe
pub fn extract_frame(
    path: &Path,
    ffmpeg: &Path,
    seconds: f64,
    max_pixels: u64,
) -> Result<RgbImage, AnalysisError> {
    let path_arg = path.to_string_lossy();
    let seek = format!("{:.3}", seconds);
    let png = run_tool(
        "ffmpeg",
        ffmpeg,
        &[
            "-v", "error", "-nostdin", "-ss", &seek, "-i", &path_arg, "-frames:v", "1", "-f",
            "image2pipe", "-vcodec", "png", "pipe:1",
        ],
    )?;
    if png.is_empty() {
        return Err(AnalysisError::Tool {
            tool: "ffmpeg",
            message: format!("no frame at {}s", seek),
        });
    }
    still::decode_bounded(ImageReader::with_format(Cursor::new(png), ImageFormat::Png), max_pixels)
}

/// Combine per-frame confidences into the video verdict
pub fn verdict_from_frames(confidences: &[f64], duration: f64) -> Verdict {
    let mean = stats::mean(confidences);
    let variance = stats::variance(confidences);

    let mut flags = Vec::new();
    let mut adjusted = mean;
    if !confidences.is_empty() && variance < CONSISTENCY_VARIANCE {
        adjusted += CONSISTENCY_BONUS;
        flags.push("consistent_frames".to_string());
    }

    Verdict {
        is_ai_generated: adjusted > AI_CONFIDENCE_THRESHOLD,
        confidence: adjusted.clamp(0.0, MAX_CONFIDENCE),
        features: FeatureSet::new()
            .with("mean_frame_confidence", mean)
            .with("frame_confidence_variance", variance),
        flags,
        frames_analyzed: Some(confidences.len()),
        duration: Some(duration),
        error: None,
    }
}

/// Probe, sample and score a video file.
///
/// Frames larger than `max_pixels` are refused, from the probed size when
/// ffprobe reports one and from the PNG header otherwise.
pub fn score_video<F>(
    path: &Path,
    tools: &MediaTools,
    max_pixels: u64,
    score_frame: F,
) -> Result<Verdict, AnalysisError>
where
    F: Fn(&RgbImage) -> Result<Verdict, AnalysisError>,
{
    let info = probe(path, &tools.ffprobe)?;
    debug!(
        "video {}x{} {:.2}s @ {:.2} fps",
        info.width, info.height, info.duration, info.fps
    );
    still::check_pixel_budget(info.width, info.height, max_pixels)?;

    let times = frame_times(info.duration, info.fps);
    if times.is_empty() {
        warn!("video too short to sample ({:.2}s)", info.duration);
    }

    let mut confidences = Vec::with_capacity(times.len());
    for t in times {
        let frame = extract_frame(path, &tools.ffmpeg, t, max_pixels)?;
        let verdict = score_frame(&frame)?;
        debug!("frame at {:.2}s: confidence {:.1}", t, verdict.confidence);
        confidences.push(verdict.confidence);
    }

    Ok(verdict_from_frames(&confidences, info.duration))
}
