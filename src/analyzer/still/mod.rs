//! Still-image scoring
//!
//! Five cheap statistics, each compared against a fixed threshold:
//!
//! | Feature | Test | Intuition |
//! |---------|------|-----------|
//! | `pixel_variance` | < 1000 | generated images tend toward flat tonal distributions |
//! | `edge_density` | < 0.1 | smoother edges, fewer fine details |
//! | `frequency_variance` | > 15 | unusual spread in the log-magnitude spectrum |
//! | `texture_variance` | < 500 | uniform local texture (LBP codes) |
//! | quadrant spread | < 100 | the four quadrants look statistically alike |
//!
//! The [`ScoringProfile::Full`] profile runs all five at 0.2 each. The
//! [`ScoringProfile::Simple`] profile runs the first three at 0.25 each and
//! can take an extra random term for demos.
//!
//! None of this is calibrated. It is a heuristic, not a classifier.

pub mod edges;
pub mod spectrum;
pub mod texture;

use super::{FeatureSet, Score, Verdict};
use crate::error::AnalysisError;
use image::{DynamicImage, GrayImage, ImageDecoder, ImageReader, Limits, Luma, RgbImage};
use std::io::{BufRead, Seek};
use std::path::Path;

pub const CANNY_LOW: f64 = 50.0;
pub const CANNY_HIGH: f64 = 150.0;

const PIXEL_VARIANCE_MAX: f64 = 1000.0;
const EDGE_DENSITY_MAX: f64 = 0.1;
const FREQUENCY_VARIANCE_MIN: f64 = 15.0;
const TEXTURE_VARIANCE_MAX: f64 = 500.0;
const QUADRANT_SPREAD_MAX: f64 = 100.0;

/// Quadrant test needs both sides strictly larger than this
const QUADRANT_MIN_SIDE: u32 = 100;

/// Upper bound (exclusive) of the simple profile's demo jitter
pub const SIMPLE_JITTER_MAX: f64 = 0.25;

/// Which set of image heuristics to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ScoringProfile {
    /// All five tests at 0.2 each
    #[default]
    Full,
    /// Pixel, edge and frequency tests at 0.25 each
    Simple,
}

impl ScoringProfile {
    pub fn weight(&self) -> f64 {
        match self {
            ScoringProfile::Full => 0.2,
            ScoringProfile::Simple => 0.25,
        }
    }
}

/// Longest side the decoder will even look at
const MAX_IMAGE_SIDE: u32 = 16_384;

/// Decode any supported raster format to 8-bit RGB
pub fn load_rgb(path: &Path, max_pixels: u64) -> Result<RgbImage, AnalysisError> {
    let reader = ImageReader::open(path)
        .and_then(|r| r.with_guessed_format())
        .map_err(|e| AnalysisError::io(path, e))?;
    decode_bounded(reader, max_pixels)
}

/// Decode to RGB, refusing anything over `max_pixels` from the header alone.
///
/// A few hundred KiB of compressed PNG can describe an 8000x8000 canvas, so
/// the byte size of an upload says nothing about what scoring will allocate.
pub fn decode_bounded<R: BufRead + Seek>(
    mut reader: ImageReader<R>,
    max_pixels: u64,
) -> Result<RgbImage, AnalysisError> {
    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_IMAGE_SIDE);
    limits.max_image_height = Some(MAX_IMAGE_SIDE);
    reader.limits(limits);

    let decoder = reader.into_decoder()?;
    let (width, height) = decoder.dimensions();
    check_pixel_budget(width, height, max_pixels)?;
    Ok(DynamicImage::from_decoder(decoder)?.to_rgb8())
}

pub fn check_pixel_budget(width: u32, height: u32, max_pixels: u64) -> Result<(), AnalysisError> {
    if width as u64 * height as u64 > max_pixels {
        return Err(AnalysisError::TooManyPixels { width, height, max_pixels });
    }
    Ok(())
}

/// ITU-R BT.601 luma in 14-bit fixed point, rounded
fn luma(r: u8, g: u8, b: u8) -> u8 {
    const R: u32 = 4899;
    const G: u32 = 9617;
    const B: u32 = 1868;
    ((r as u32 * R + g as u32 * G + b as u32 * B + (1 << 13)) >> 14) as u8
}

pub fn to_grayscale(img: &RgbImage) -> GrayImage {
    GrayImage::from_fn(img.width(), img.height(), |x, y| {
        let [r, g, b] = img.get_pixel(x, y).0;
        Luma([luma(r, g, b)])
    })
}

/// Variance of each quadrant (split at h/2, w/2), in row-major quadrant order
pub fn quadrant_variances(gray: &GrayImage) -> [f64; 4] {
    let (w, h) = gray.dimensions();
    let (mid_x, mid_y) = (w / 2, h / 2);
    let bounds = [
        (0, mid_x, 0, mid_y),
        (mid_x, w, 0, mid_y),
        (0, mid_x, mid_y, h),
        (mid_x, w, mid_y, h),
    ];

    bounds.map(|(x0, x1, y0, y1)| {
        let mut values = Vec::with_capacity(((x1 - x0) * (y1 - y0)) as usize);
        for y in y0..y1 {
            let row = &gray.as_raw()[(y * w) as usize..((y + 1) * w) as usize];
            values.extend_from_slice(&row[x0 as usize..x1 as usize]);
        }
        super::stats::variance(&values)
    })
}

/// Score a decoded image. `jitter` is added to the raw score of the simple
/// profile only; pass 0.0 for deterministic results.
pub fn score_image(
    img: &RgbImage,
    profile: ScoringProfile,
    jitter: f64,
) -> Result<Verdict, AnalysisError> {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(AnalysisError::Empty("image has no pixels"));
    }

    let pixel_variance = super::stats::variance(img.as_raw());
    let pixel_mean = super::stats::mean(img.as_raw());

    let gray = to_grayscale(img);
    let edge_density = edges::edge_density(&gray, CANNY_LOW, CANNY_HIGH);
    let frequency_variance = spectrum::frequency_variance(&gray);

    let mut features = FeatureSet::new()
        .with("pixel_variance", pixel_variance)
        .with("pixel_mean", pixel_mean)
        .with("edge_density", edge_density)
        .with("frequency_variance", frequency_variance);

    let weight = profile.weight();
    let mut score = Score::default();
    score.test(pixel_variance < PIXEL_VARIANCE_MAX, weight, "low_pixel_variance");
    score.test(edge_density < EDGE_DENSITY_MAX, weight, "smooth_edges");
    score.test(frequency_variance > FREQUENCY_VARIANCE_MIN, weight, "high_frequency_variance");

    match profile {
        ScoringProfile::Full => {
            let texture_variance = texture::texture_variance(&gray);
            features = features.with("texture_variance", texture_variance);
            score.test(texture_variance < TEXTURE_VARIANCE_MAX, weight, "uniform_texture");

            if width > QUADRANT_MIN_SIDE && height > QUADRANT_MIN_SIDE {
                let quarters = quadrant_variances(&gray);
                let max = quarters.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                let min = quarters.iter().cloned().fold(f64::INFINITY, f64::min);
                let spread = max - min;
                features = features.with("quadrant_variance_spread", spread);
                score.test(spread < QUADRANT_SPREAD_MAX, weight, "uniform_quadrants");
            }
        }
        ScoringProfile::Simple => {
            score.test(jitter > 0.0, jitter, "demo_jitter");
        }
    }

    Ok(score.into_verdict(features))
}
