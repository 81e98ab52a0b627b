//! Short-time spectral features
//!
//! Frames follow the usual music-analysis defaults: 2048-sample periodic Hann
//! window, hop of 512, signal zero-padded by half a window on both sides so
//! frame `t` is centered on sample `t * 512`.
//!
//! ```text
//! samples ──→ frame + window ──→ FFT ──→ |X| ──→ centroid, rolloff
//!                                         │
//!                                        |X|² ──→ mel (128) ──→ dB ──→ DCT ──→ MFCC (13)
//! ```
//!
//! Only the per-frame reductions are kept, never the full spectrogram.

use super::super::stats;
use rayon::prelude::*;
use rustfft::{num_complex::Complex, FftPlanner};
use std::f64::consts::PI;

pub const N_FFT: usize = 2048;
pub const HOP_LENGTH: usize = 512;
pub const N_MELS: usize = 128;
pub const N_MFCC: usize = 13;
pub const ROLLOFF_PERCENT: f64 = 0.85;
/// Dynamic range kept by [`power_to_db`]
pub const TOP_DB: f64 = 80.0;
const AMIN: f64 = 1e-10;
/// Magnitudes at or below this count as zero for crossing detection
const ZCR_THRESHOLD: f64 = 1e-10;

/// Periodic Hann window (`w[0] = 0`, peak at `n / 2`)
pub fn hann_window(size: usize) -> Vec<f64> {
    (0..size)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / size as f64).cos())
        .collect()
}

/// Frames produced for a signal of `len` samples
pub fn frame_count(len: usize) -> usize {
    1 + len / HOP_LENGTH
}

// ============================================================================
// MEL SCALE
// ============================================================================

const MEL_F_SP: f64 = 200.0 / 3.0;
const MEL_MIN_LOG_HZ: f64 = 1000.0;
const MEL_MIN_LOG_MEL: f64 = MEL_MIN_LOG_HZ / MEL_F_SP;

fn mel_logstep() -> f64 {
    6.4f64.ln() / 27.0
}

/// Slaney mel scale: linear below 1 kHz, logarithmic above
pub fn hz_to_mel(hz: f64) -> f64 {
    if hz >= MEL_MIN_LOG_HZ {
        MEL_MIN_LOG_MEL + (hz / MEL_MIN_LOG_HZ).ln() / mel_logstep()
    } else {
        hz / MEL_F_SP
    }
}

pub fn mel_to_hz(mel: f64) -> f64 {
    if mel >= MEL_MIN_LOG_MEL {
        MEL_MIN_LOG_HZ * (mel_logstep() * (mel - MEL_MIN_LOG_MEL)).exp()
    } else {
        mel * MEL_F_SP
    }
}

/// One triangular band, stored from its first non-zero bin
#[derive(Debug, Clone)]
struct MelBand {
    start: usize,
    weights: Vec<f64>,
}

/// Area-normalized triangular filters from 0 Hz to Nyquist
#[derive(Debug, Clone)]
pub struct MelFilterbank {
    bands: Vec<MelBand>,
}

impl MelFilterbank {
    pub fn new(sample_rate: u32, n_fft: usize, n_mels: usize) -> Self {
        let sr = sample_rate as f64;
        let n_bins = n_fft / 2 + 1;
        let fft_freqs: Vec<f64> = (0..n_bins).map(|k| k as f64 * sr / n_fft as f64).collect();

        let max_mel = hz_to_mel(sr / 2.0);
        let mel_f: Vec<f64> = (0..n_mels + 2)
            .map(|i| mel_to_hz(max_mel * i as f64 / (n_mels + 1) as f64))
            .collect();

        let bands = (0..n_mels)
            .map(|m| {
                let (lo, center, hi) = (mel_f[m], mel_f[m + 1], mel_f[m + 2]);
                let norm = 2.0 / (hi - lo);
                let weights: Vec<f64> = fft_freqs
                    .iter()
                    .map(|&f| {
                        let lower = (f - lo) / (center - lo);
                        let upper = (hi - f) / (hi - center);
                        lower.min(upper).max(0.0) * norm
                    })
                    .collect();

                let start = weights.iter().position(|&w| w > 0.0).unwrap_or(weights.len());
                let end = weights.iter().rposition(|&w| w > 0.0).map_or(start, |i| i + 1);
                MelBand { start, weights: weights[start..end].to_vec() }
            })
            .collect();

        Self { bands }
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    /// Mel energies of one power spectrum
    pub fn apply(&self, power: &[f64]) -> Vec<f64> {
        self.bands
            .iter()
            .map(|band| {
                let bins = power.get(band.start..).unwrap_or(&[]);
                band.weights.iter().zip(bins).map(|(w, p)| w * p).sum()
            })
            .collect()
    }
}

// ============================================================================
// FRAME ANALYSIS
// ============================================================================

/// Per-frame reductions of the short-time spectrum
#[derive(Debug, Clone, Default)]
pub struct SpectralFrames {
    /// Hz
    pub centroid: Vec<f64>,
    /// Hz
    pub rolloff: Vec<f64>,
    /// `N_MELS` power values per frame
    pub mel_power: Vec<Vec<f64>>,
}

impl SpectralFrames {
    pub fn len(&self) -> usize {
        self.centroid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.centroid.is_empty()
    }
}

fn spectral_centroid(magnitude: &[f64], bin_hz: f64) -> f64 {
    let total: f64 = magnitude.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    magnitude.iter().enumerate().map(|(k, m)| k as f64 * bin_hz * m).sum::<f64>() / total
}

fn spectral_rolloff(magnitude: &[f64], bin_hz: f64) -> f64 {
    let threshold = ROLLOFF_PERCENT * magnitude.iter().sum::<f64>();
    let mut cumulative = 0.0;
    for (k, m) in magnitude.iter().enumerate() {
        cumulative += m;
        if cumulative >= threshold {
            return k as f64 * bin_hz;
        }
    }
    (magnitude.len().saturating_sub(1)) as f64 * bin_hz
}

/// Run the STFT and keep centroid, rolloff and mel power per frame
pub fn analyze_frames(samples: &[f64], sample_rate: u32) -> SpectralFrames {
    if samples.is_empty() || sample_rate == 0 {
        return SpectralFrames::default();
    }

    let window = hann_window(N_FFT);
    let fft = FftPlanner::<f64>::new().plan_fft_forward(N_FFT);
    let filterbank = MelFilterbank::new(sample_rate, N_FFT, N_MELS);
    let bin_hz = sample_rate as f64 / N_FFT as f64;
    let pad = (N_FFT / 2) as isize;

    let frames: Vec<(f64, f64, Vec<f64>)> = (0..frame_count(samples.len()))
        .into_par_iter()
        .map(|t| {
            let origin = (t * HOP_LENGTH) as isize - pad;
            let mut buffer: Vec<Complex<f64>> = window
                .iter()
                .enumerate()
                .map(|(i, w)| {
                    let idx = origin + i as isize;
                    let x = if idx >= 0 { samples.get(idx as usize).copied().unwrap_or(0.0) } else { 0.0 };
                    Complex::new(x * w, 0.0)
                })
                .collect();
            fft.process(&mut buffer);

            let magnitude: Vec<f64> = buffer[..N_FFT / 2 + 1].iter().map(|c| c.norm()).collect();
            let power: Vec<f64> = magnitude.iter().map(|m| m * m).collect();
            (
                spectral_centroid(&magnitude, bin_hz),
                spectral_rolloff(&magnitude, bin_hz),
                filterbank.apply(&power),
            )
        })
        .collect();

    let mut out = SpectralFrames {
        centroid: Vec::with_capacity(frames.len()),
        rolloff: Vec::with_capacity(frames.len()),
        mel_power: Vec::with_capacity(frames.len()),
    };
    for (centroid, rolloff, mel) in frames {
        out.centroid.push(centroid);
        out.rolloff.push(rolloff);
        out.mel_power.push(mel);
    }
    out
}

/// `10·log10(max(S, 1e-10))`, floored at `TOP_DB` below the global peak
pub fn power_to_db(power: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let mut db: Vec<Vec<f64>> = power
        .iter()
        .map(|frame| frame.iter().map(|&p| 10.0 * p.max(AMIN).log10()).collect())
        .collect();

    let peak = db.iter().flatten().cloned().fold(f64::NEG_INFINITY, f64::max);
    let floor = peak - TOP_DB;
    for value in db.iter_mut().flatten() {
        *value = value.max(floor);
    }
    db
}

/// Orthonormal DCT-II of each dB frame, first `n_mfcc` coefficients
pub fn mfcc(mel_db: &[Vec<f64>], n_mfcc: usize) -> Vec<Vec<f64>> {
    let Some(n) = mel_db.first().map(Vec::len).filter(|&n| n > 0) else {
        return vec![];
    };

    let basis: Vec<Vec<f64>> = (0..n_mfcc.min(n))
        .map(|k| {
            let scale = if k == 0 { (1.0 / n as f64).sqrt() } else { (2.0 / n as f64).sqrt() };
            (0..n)
                .map(|i| scale * (PI * k as f64 * (2 * i + 1) as f64 / (2 * n) as f64).cos())
                .collect()
        })
        .collect();

    mel_db
        .par_iter()
        .map(|frame| {
            basis
                .iter()
                .map(|row| row.iter().zip(frame).map(|(b, x)| b * x).sum())
                .collect()
        })
        .collect()
}

/// Mean over coefficients of each coefficient's variance over time
pub fn mfcc_variance(coefficients: &[Vec<f64>]) -> f64 {
    let Some(n) = coefficients.first().map(Vec::len) else {
        return 0.0;
    };
    let per_coefficient: Vec<f64> = (0..n)
        .map(|k| {
            let track: Vec<f64> = coefficients.iter().map(|frame| frame[k]).collect();
            stats::variance(&track)
        })
        .collect();
    stats::mean(&per_coefficient)
}

/// Zero-crossing rate per frame (edge-padded, same framing as the STFT)
pub fn zero_crossing_rate(samples: &[f64]) -> Vec<f64> {
    if samples.is_empty() {
        return vec![];
    }
    let pad = N_FFT / 2;
    let first = samples[0];
    let last = samples[samples.len() - 1];
    let padded: Vec<f64> = std::iter::repeat(first)
        .take(pad)
        .chain(samples.iter().copied())
        .chain(std::iter::repeat(last).take(pad))
        .collect();

    let negative = |x: f64| x < -ZCR_THRESHOLD;

    // prefix[i] = crossings between padded[j - 1] and padded[j] for j < i
    let mut prefix = vec![0usize; padded.len() + 1];
    for i in 1..padded.len() {
        let crossed = negative(padded[i]) != negative(padded[i - 1]);
        prefix[i + 1] = prefix[i] + usize::from(crossed);
    }

    (0..frame_count(samples.len()))
        .map(|t| {
            let start = t * HOP_LENGTH;
            let end = start + N_FFT;
            (prefix[end] - prefix[start + 1]) as f64 / N_FFT as f64
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // WINDOW
    // ==========================================================================
    //
    // Periodic Hann: starts at zero, peaks at exactly 1.0 in the middle, and
    // is NOT symmetric end-to-end (the last sample is not zero). This is the
    // window that tiles perfectly at 75% overlap.
    // ==========================================================================

    #[test]
    fn test_hann_window_is_periodic() {
        let w = hann_window(8);
        assert_eq!(w[0], 0.0);
        assert!((w[4] - 1.0).abs() < 1e-12);
        assert!((w[2] - 0.5).abs() < 1e-12);
        assert!(w[7] > 0.0);
    }

    #[test]
    fn test_frame_count_matches_centered_framing() {
        assert_eq!(frame_count(0), 1);
        assert_eq!(frame_count(511), 1);
        assert_eq!(frame_count(512), 2);
        assert_eq!(frame_count(22050), 44);
    }

    // ==========================================================================
    // MEL SCALE
    // ==========================================================================

    #[test]
    fn test_mel_scale_reference_points() {
        assert!((hz_to_mel(1000.0) - 15.0).abs() < 1e-9);
        assert!((hz_to_mel(200.0) - 3.0).abs() < 1e-9);
        for hz in [0.0, 440.0, 1000.0, 4000.0, 11025.0] {
            assert!((mel_to_hz(hz_to_mel(hz)) - hz).abs() < 1e-6);
        }
    }

    #[test]
    fn test_filterbank_shape() {
        let bank = MelFilterbank::new(22050, N_FFT, N_MELS);
        assert_eq!(bank.len(), N_MELS);
        // Every band picks up at least one bin at this resolution
        for band in &bank.bands {
            assert!(!band.weights.is_empty());
            assert!(band.weights.iter().all(|&w| w >= 0.0));
        }
        // Bands move upward in frequency
        assert!(bank.bands.windows(2).all(|p| p[0].start <= p[1].start));
    }

    #[test]
    fn test_filterbank_apply_silence() {
        let bank = MelFilterbank::new(16000, N_FFT, 40);
        let out = bank.apply(&vec![0.0; N_FFT / 2 + 1]);
        assert_eq!(out.len(), 40);
        assert!(out.iter().all(|&v| v == 0.0));
    }

    // ==========================================================================
    // SPECTRAL SHAPE
    // ==========================================================================

    #[test]
    fn test_pure_tone_centroid_and_rolloff() {
        let sr = 22050;
        let freq = 1000.0;
        let samples: Vec<f64> =
            (0..sr).map(|i| (2.0 * PI * freq * i as f64 / sr as f64).sin()).collect();

        let frames = analyze_frames(&samples, sr as u32);
        assert_eq!(frames.len(), frame_count(samples.len()));

        // Look at a frame well inside the signal
        let mid = frames.len() / 2;
        assert!((frames.centroid[mid] - freq).abs() < 50.0, "centroid {}", frames.centroid[mid]);
        assert!((frames.rolloff[mid] - freq).abs() < 50.0, "rolloff {}", frames.rolloff[mid]);
        assert_eq!(frames.mel_power[mid].len(), N_MELS);
    }

    #[test]
    fn test_silence_has_zero_centroid() {
        let frames = analyze_frames(&vec![0.0; 4096], 22050);
        assert!(frames.centroid.iter().all(|&c| c == 0.0));
        assert!(frames.rolloff.iter().all(|&r| r == 0.0));
    }

    #[test]
    fn test_empty_signal() {
        assert!(analyze_frames(&[], 22050).is_empty());
        assert!(zero_crossing_rate(&[]).is_empty());
    }

    // ==========================================================================
    // DECIBELS AND CEPSTRUM
    // ==========================================================================

    #[test]
    fn test_power_to_db_clips_dynamic_range() {
        let db = power_to_db(&[vec![1.0, 1e-3, 0.0]]);
        assert!((db[0][0] - 0.0).abs() < 1e-9);
        assert!((db[0][1] + 30.0).abs() < 1e-9);
        // 1e-10 floor is -100 dB, then clipped to peak - 80
        assert!((db[0][2] + 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_dct_of_constant_is_dc_only() {
        let frames = vec![vec![2.0; 16]; 3];
        let coefficients = mfcc(&frames, N_MFCC);
        assert_eq!(coefficients.len(), 3);
        assert_eq!(coefficients[0].len(), N_MFCC);
        // sqrt(1/16) * 16 * 2
        assert!((coefficients[0][0] - 8.0).abs() < 1e-9);
        for c in &coefficients[0][1..] {
            assert!(c.abs() < 1e-9);
        }
        assert_eq!(mfcc_variance(&coefficients), 0.0);
    }

    #[test]
    fn test_dct_is_orthonormal() {
        // Energy is preserved when all coefficients are kept
        let frame: Vec<f64> = (0..8).map(|i| (i * i) as f64 - 3.0).collect();
        let coefficients = mfcc(&[frame.clone()], 8);
        let energy_in: f64 = frame.iter().map(|x| x * x).sum();
        let energy_out: f64 = coefficients[0].iter().map(|x| x * x).sum();
        assert!((energy_in - energy_out).abs() < 1e-9);
    }

    #[test]
    fn test_mfcc_variance_averages_coefficients() {
        // Coefficient 0 alternates 0/2 (variance 1), coefficient 1 is constant
        let coefficients = vec![vec![0.0, 5.0], vec![2.0, 5.0]];
        assert!((mfcc_variance(&coefficients) - 0.5).abs() < 1e-12);
    }

    // ==========================================================================
    // ZERO CROSSINGS
    // ==========================================================================

    #[test]
    fn test_alternating_signal_crosses_every_sample() {
        let samples: Vec<f64> = (0..8192).map(|i| if i % 2 == 0 { 0.5 } else { -0.5 }).collect();
        let zcr = zero_crossing_rate(&samples);
        assert_eq!(zcr.len(), frame_count(samples.len()));
        // A frame fully inside the signal has 2047 crossings in 2048 samples
        let mid = zcr.len() / 2;
        assert!((zcr[mid] - 2047.0 / 2048.0).abs() < 1e-12);
    }

    #[test]
    fn test_tiny_values_do_not_cross() {
        let samples: Vec<f64> = (0..4096).map(|i| if i % 2 == 0 { 1e-12 } else { -1e-12 }).collect();
        assert!(zero_crossing_rate(&samples).iter().all(|&z| z == 0.0));
    }
}
