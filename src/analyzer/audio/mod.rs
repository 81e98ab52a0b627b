//! Audio scoring
//!
//! Four tests, 0.2 each:
//!
//! | Feature | Test | Flag |
//! |---------|------|------|
//! | spectral centroid variance | < 1 000 000 Hz² | `stable_spectrum` |
//! | mean MFCC variance | < 100 | `regular_mfcc` |
//! | inter-beat interval variance | < 0.1 frames², more than 10 beats only | `metronomic_tempo` |
//! | mean spectral rolloff | > 0.4 × sample rate | `high_rolloff` |
//!
//! The maximum reachable score is 0.8, so audio can be judged AI-generated
//! with at most 80% confidence.

pub mod beat;
pub mod decode;
pub mod features;

pub use decode::Waveform;

use super::{stats, FeatureSet, Score, Verdict};
use crate::error::AnalysisError;
use std::path::Path;
use tracing::debug;

const TEST_WEIGHT: f64 = 0.2;
const CENTROID_VARIANCE_MAX: f64 = 1_000_000.0;
const MFCC_VARIANCE_MAX: f64 = 100.0;
const BEAT_INTERVAL_VARIANCE_MAX: f64 = 0.1;
/// Tempo regularity is only judged with more beats than this
const MIN_BEATS: usize = 10;
const ROLLOFF_RATIO_MIN: f64 = 0.4;

/// Everything the audio tests look at, measured once
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioSummary {
    pub sample_rate: u32,
    /// Seconds
    pub duration: f64,
    pub centroid_variance: f64,
    pub rolloff_mean: f64,
    pub zero_crossing_rate: f64,
    pub mfcc_variance: f64,
    pub tempo: f64,
    /// Onset-frame indices
    pub beats: Vec<usize>,
}

impl AudioSummary {
    /// Measure a decoded waveform
    pub fn measure(wave: &Waveform) -> Result<Self, AnalysisError> {
        if wave.samples.is_empty() || wave.sample_rate == 0 {
            return Err(AnalysisError::Empty("audio stream has no samples"));
        }

        let frames = features::analyze_frames(&wave.samples, wave.sample_rate);
        let mel_db = features::power_to_db(&frames.mel_power);
        let mfcc = features::mfcc(&mel_db, features::N_MFCC);
        let onset = beat::onset_strength(&mel_db);
        let (tempo, beats) = beat::beat_track(&onset, wave.sample_rate);

        Ok(Self {
            sample_rate: wave.sample_rate,
            duration: wave.duration(),
            centroid_variance: stats::variance(&frames.centroid),
            rolloff_mean: stats::mean(&frames.rolloff),
            zero_crossing_rate: stats::mean(&features::zero_crossing_rate(&wave.samples)),
            mfcc_variance: features::mfcc_variance(&mfcc),
            tempo,
            beats,
        })
    }

    /// Variance of the gaps between consecutive beats, in frames
    pub fn beat_interval_variance(&self) -> f64 {
        let intervals: Vec<f64> = self.beats.windows(2).map(|w| w[1] as f64 - w[0] as f64).collect();
        stats::variance(&intervals)
    }

    pub fn features(&self) -> FeatureSet {
        FeatureSet::new()
            .with("spectral_variance", self.centroid_variance)
            .with("spectral_rolloff_mean", self.rolloff_mean)
            .with("zero_crossing_rate", self.zero_crossing_rate)
            .with("mfcc_variance", self.mfcc_variance)
            .with("tempo", self.tempo)
            .with("beat_count", self.beats.len() as f64)
            .with("duration", self.duration)
    }

    pub fn score(&self) -> Verdict {
        let mut score = Score::default();
        score.test(self.centroid_variance < CENTROID_VARIANCE_MAX, TEST_WEIGHT, "stable_spectrum");
        score.test(self.mfcc_variance < MFCC_VARIANCE_MAX, TEST_WEIGHT, "regular_mfcc");
        score.test(
            self.beats.len() > MIN_BEATS && self.beat_interval_variance() < BEAT_INTERVAL_VARIANCE_MAX,
            TEST_WEIGHT,
            "metronomic_tempo",
        );
        score.test(
            self.rolloff_mean > ROLLOFF_RATIO_MIN * self.sample_rate as f64,
            TEST_WEIGHT,
            "high_rolloff",
        );
        score.into_verdict(self.features())
    }
}

pub fn score_waveform(wave: &Waveform) -> Result<Verdict, AnalysisError> {
    let summary = AudioSummary::measure(wave)?;
    debug!(
        "audio {:.1}s @ {} Hz: tempo {:.1} BPM, {} beats",
        summary.duration,
        summary.sample_rate,
        summary.tempo,
        summary.beats.len()
    );
    Ok(summary.score())
}

/// Decode (up to `max_secs`) and score an audio file
pub fn score_audio(path: &Path, max_secs: u32) -> Result<Verdict, AnalysisError> {
    let wave = decode::decode_file(path, max_secs)?;
    score_waveform(&wave)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const SR: u32 = 22050;

    fn summary_with_beats(beats: Vec<usize>) -> AudioSummary {
        AudioSummary {
            sample_rate: SR,
            // Fails every other test
            centroid_variance: 5e6,
            mfcc_variance: 500.0,
            rolloff_mean: 1000.0,
            beats,
            ..Default::default()
        }
    }

    // ==========================================================================
    // SCORING RULES
    // ==========================================================================

    #[test]
    fn test_metronomic_beats_score() {
        let beats: Vec<usize> = (0..12).map(|i| 10 + i * 22).collect();
        let verdict = summary_with_beats(beats).score();
        assert_eq!(verdict.flags, vec!["metronomic_tempo"]);
        assert!((verdict.confidence - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_ten_beats_never_count() {
        // Perfectly regular, but not enough of them
        let beats: Vec<usize> = (0..10).map(|i| i * 22).collect();
        let verdict = summary_with_beats(beats).score();
        assert!(verdict.flags.is_empty());
        assert_eq!(verdict.confidence, 0.0);
    }

    #[test]
    fn test_irregular_beats_do_not_score() {
        let beats: Vec<usize> = (0..12).map(|i| i * 22 + (i % 3) * 2).collect();
        assert!(summary_with_beats(beats).beat_interval_variance() > 0.1);
        let verdict = summary_with_beats((0..12).map(|i| i * 22 + (i % 3) * 2).collect()).score();
        assert!(verdict.flags.is_empty());
    }

    #[test]
    fn test_all_tests_firing_caps_at_eighty() {
        let summary = AudioSummary {
            sample_rate: SR,
            centroid_variance: 10.0,
            mfcc_variance: 1.0,
            rolloff_mean: 0.45 * SR as f64,
            beats: (0..20).map(|i| i * 20).collect(),
            ..Default::default()
        };
        let verdict = summary.score();
        assert!((verdict.confidence - 80.0).abs() < 1e-9);
        assert!(verdict.is_ai_generated);
        assert_eq!(verdict.flags.len(), 4);
        assert_eq!(verdict.features.get("beat_count"), Some(20.0));
    }

    // ==========================================================================
    // END-TO-END ON SYNTHETIC WAVEFORMS
    // ==========================================================================

    #[test]
    fn test_silence_scores_point_four() {
        let wave = Waveform { samples: vec![0.0; SR as usize * 3], sample_rate: SR };
        let verdict = score_waveform(&wave).unwrap();

        // Flat spectrum and flat cepstrum fire; no beats, no rolloff
        assert_eq!(verdict.flags, vec!["stable_spectrum", "regular_mfcc"]);
        assert!((verdict.confidence - 40.0).abs() < 1e-9);
        assert!(!verdict.is_ai_generated);
        assert_eq!(verdict.features.get("tempo"), Some(0.0));
        assert_eq!(verdict.features.get("beat_count"), Some(0.0));
        assert!((verdict.features.get("duration").unwrap() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_white_noise_has_high_rolloff() {
        let mut rng = StdRng::seed_from_u64(7);
        let samples: Vec<f64> = (0..SR as usize * 2).map(|_| rng.gen_range(-0.5..0.5)).collect();
        let wave = Waveform { samples, sample_rate: SR };

        let verdict = score_waveform(&wave).unwrap();
        let rolloff = verdict.features.get("spectral_rolloff_mean").unwrap();
        assert!(rolloff > 0.4 * SR as f64, "rolloff {}", rolloff);
        assert!(verdict.flags.contains(&"high_rolloff".to_string()));
        // Noise crosses zero about every other sample
        let zcr = verdict.features.get("zero_crossing_rate").unwrap();
        assert!(zcr > 0.4 && zcr < 0.6, "zcr {}", zcr);
    }

    #[test]
    fn test_click_track_is_metronomic() {
        // One impulse every 22 hops (117.45 BPM), 12 seconds
        let period = 22 * features::HOP_LENGTH;
        let samples: Vec<f64> = (0..SR as usize * 12)
            .map(|i| if i >= 2560 && (i - 2560) % period == 0 { 1.0 } else { 0.0 })
            .collect();
        let summary = AudioSummary::measure(&Waveform { samples, sample_rate: SR }).unwrap();

        assert!((summary.tempo - 117.45).abs() < 1.0, "tempo {}", summary.tempo);
        assert!(summary.beats.len() > 10, "only {} beats", summary.beats.len());
        assert!(summary.beat_interval_variance() < 0.1);
        assert!(summary.score().flags.contains(&"metronomic_tempo".to_string()));
    }

    #[test]
    fn test_empty_waveform_is_error() {
        let wave = Waveform { samples: vec![], sample_rate: SR };
        assert!(matches!(score_waveform(&wave), Err(AnalysisError::Empty(_))));
    }

    #[test]
    fn test_score_audio_reads_wav() {
        let samples = vec![0i16; 8000];
        let file = decode::tests::write_wav(&samples, 8000, 1);
        let verdict = score_audio(file.path(), 300).unwrap();
        assert!(!verdict.is_ai_generated);
        assert_eq!(verdict.features.get("duration"), Some(1.0));
    }
}
