//! Heuristic scoring of images, video and audio
//!
//! Each medium has its own scorer module. They all follow the same recipe:
//! measure a handful of features, add a fixed weight for every threshold
//! test that fires, then map the summed score to a [`Verdict`].
//!
//! | Raw score | Confidence | Verdict |
//! |-----------|------------|---------|
//! | 0.0 - 0.5 | 0 - 50% | not AI-generated |
//! | > 0.5 | 50 - 95% | AI-generated |
//!
//! Confidence is `score × 100`, never above 95. Video aggregates per-frame
//! confidences instead of summing tests (see [`video`]).
//!
//! [`Analyzer`] owns the configuration and turns scorer errors into a
//! verdict with `error` set, so one bad file never becomes a server error.

pub mod audio;
pub mod stats;
pub mod still;
pub mod video;

pub use still::ScoringProfile;

use crate::config::AnalyzerConfig;
use crate::error::AnalysisError;
use crate::media::MediaKind;
use ::image::RgbImage;
use rand::Rng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, error, info};

/// Scores strictly above this are judged AI-generated
pub const AI_SCORE_THRESHOLD: f64 = 0.5;

/// Confidence never exceeds this, whatever the raw score
pub const MAX_CONFIDENCE: f64 = 95.0;

/// Named measurements taken from one media sample
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FeatureSet(BTreeMap<String, f64>);

impl FeatureSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: f64) -> Self {
        self.0.insert(name.to_string(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// Outcome of analyzing one file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub is_ai_generated: bool,
    /// Percentage in [0, 95]
    pub confidence: f64,
    #[serde(skip_serializing_if = "FeatureSet::is_empty")]
    pub features: FeatureSet,
    /// Names of the heuristics that fired
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
    /// Video only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frames_analyzed: Option<usize>,
    /// Video only, seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Verdict {
    /// Verdict for a file that could not be analyzed
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            is_ai_generated: false,
            confidence: 0.0,
            features: FeatureSet::default(),
            flags: vec![],
            frames_analyzed: None,
            duration: None,
            error: Some(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// `score × 100`, capped at [`MAX_CONFIDENCE`]
pub fn confidence_from_score(score: f64) -> f64 {
    (score.clamp(0.0, 1.0) * 100.0).min(MAX_CONFIDENCE)
}

/// Additive score built from weighted threshold tests
#[derive(Debug, Clone, Default)]
pub(crate) struct Score {
    raw: f64,
    flags: Vec<String>,
}

impl Score {
    /// Add `weight` and record `flag` when `hit` is true
    pub fn test(&mut self, hit: bool, weight: f64, flag: &str) {
        if hit {
            self.raw += weight;
            self.flags.push(flag.to_string());
        }
    }

    /// Clamped to [0, 1]
    pub fn value(&self) -> f64 {
        self.raw.clamp(0.0, 1.0)
    }

    pub fn into_verdict(self, features: FeatureSet) -> Verdict {
        let score = self.value();
        Verdict {
            is_ai_generated: score > AI_SCORE_THRESHOLD,
            confidence: confidence_from_score(score),
            features,
            flags: self.flags,
            frames_analyzed: None,
            duration: None,
            error: None,
        }
    }
}

/// Entry point tying the per-medium scorers to one configuration
#[derive(Debug, Clone, Default)]
pub struct Analyzer {
    config: AnalyzerConfig,
}

impl Analyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    pub fn with_profile(mut self, profile: ScoringProfile) -> Self {
        self.config.profile = profile;
        self
    }

    pub fn with_demo_jitter(mut self, enabled: bool) -> Self {
        self.config.demo_jitter = enabled;
        self
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Analyze a file already classified as `kind`.
    ///
    /// Never fails: problems come back as a verdict with `error` set.
    pub fn analyze(&self, path: &Path, kind: MediaKind) -> Verdict {
        let started = Instant::now();
        let outcome = match kind {
            MediaKind::Image => self.analyze_image(path),
            MediaKind::Video => {
                let max_pixels = self.config.max_image_pixels;
                video::score_video(path, &self.config.tools, max_pixels, |frame| self.score_pixels(frame))
            }
            MediaKind::Audio => audio::score_audio(path, self.config.max_audio_secs),
            MediaKind::Unknown => return Verdict::failed("Unsupported file type"),
        };

        match outcome {
            Ok(verdict) => {
                info!(
                    "{} analyzed in {:.2?}: ai={} confidence={:.1} flags={:?}",
                    kind,
                    started.elapsed(),
                    verdict.is_ai_generated,
                    verdict.confidence,
                    verdict.flags
                );
                verdict
            }
            Err(e) => {
                error!("Error analyzing {}: {}", kind, e);
                Verdict::failed(e.to_string())
            }
        }
    }

    /// Score already-decoded pixels with the configured profile
    pub fn score_pixels(&self, pixels: &RgbImage) -> Result<Verdict, AnalysisError> {
        still::score_image(pixels, self.config.profile, self.draw_jitter())
    }

    fn analyze_image(&self, path: &Path) -> Result<Verdict, AnalysisError> {
        let pixels = still::load_rgb(path, self.config.max_image_pixels)?;
        debug!("decoded {}x{} image", pixels.width(), pixels.height());
        self.score_pixels(&pixels)
    }

    fn draw_jitter(&self) -> f64 {
        if self.config.demo_jitter && self.config.profile == ScoringProfile::Simple {
            rand::thread_rng().gen_range(0.0..still::SIMPLE_JITTER_MAX)
        } else {
            0.0
        }
    }
}
