//! Audio decoding to a mono waveform
//!
//! Any container/codec symphonia was built with (MP3, AAC/M4A, FLAC, WAV,
//! Ogg Vorbis). Channels are averaged; the sample rate is kept as-is.

use crate::error::AnalysisError;
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

/// Used when the stream does not declare a rate
const FALLBACK_SAMPLE_RATE: u32 = 44100;

/// Decoded mono audio
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub samples: Vec<f64>,
    pub sample_rate: u32,
}

impl Waveform {
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Decode at most `max_secs` seconds of `path`
pub fn decode_file(path: &Path, max_secs: u32) -> Result<Waveform, AnalysisError> {
    let file = File::open(path).map_err(|e| AnalysisError::io(path, e))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| AnalysisError::AudioDecode(e.to_string()))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or(AnalysisError::Empty("no audio track found"))?;
    let track_id = track.id;
    let sample_rate = track.codec_params.sample_rate.unwrap_or(FALLBACK_SAMPLE_RATE);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| AnalysisError::AudioDecode(e.to_string()))?;

    let max_samples = sample_rate as usize * max_secs as usize;
    let mut samples = Vec::new();
    // Buffer plus its capacity in frames
    let mut sample_buf: Option<(SampleBuffer<f32>, u64)> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => {
                if samples.is_empty() {
                    return Err(AnalysisError::AudioDecode(e.to_string()));
                }
                warn!("stopping audio decode early: {}", e);
                break;
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                debug!("skipping corrupt packet: {}", e);
                continue;
            }
            Err(e) => return Err(AnalysisError::AudioDecode(e.to_string())),
        };

        let frames = decoded.capacity() as u64;
        if sample_buf.as_ref().map_or(true, |(_, cap)| *cap < frames) {
            sample_buf = Some((SampleBuffer::new(frames, *decoded.spec()), frames));
        }

        if let Some((ref mut buf, _)) = sample_buf {
            let channel_count = decoded.spec().channels.count().max(1);
            buf.copy_interleaved_ref(decoded);

            for chunk in buf.samples().chunks(channel_count) {
                let mono: f64 = chunk.iter().map(|&s| s as f64).sum::<f64>() / channel_count as f64;
                samples.push(mono);
            }

            if samples.len() >= max_samples {
                samples.truncate(max_samples);
                debug!("audio truncated at {}s", max_secs);
                break;
            }
        }
    }

    if samples.is_empty() {
        return Err(AnalysisError::Empty("audio stream has no samples"));
    }

    Ok(Waveform { samples, sample_rate })
}
