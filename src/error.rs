//! Error types
//!
//! Two tiers, matching what callers of the HTTP API observe:
//!
//! - [`AnalysisError`]: a single file could not be scored. [`crate::Analyzer`]
//!   folds these into a [`crate::Verdict`] with `error` set, so they surface
//!   as a 200 response.
//! - [`ApiError`]: the request itself is unusable (no file, unsupported type,
//!   too large), the server is saturated, or it failed unexpectedly. These map to HTTP status
//!   codes.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot decode image: {0}")]
    Image(#[from] image::ImageError),

    #[error("cannot decode audio: {0}")]
    AudioDecode(String),

    /// An external tool (ffmpeg/ffprobe) could not be run or exited non-zero
    #[error("{tool} failed: {message}")]
    Tool { tool: &'static str, message: String },

    #[error("unreadable ffprobe output: {0}")]
    Probe(#[from] serde_json::Error),

    #[error("image too large: {width}x{height} is over the {max_pixels} pixel limit")]
    TooManyPixels { width: u32, height: u32, max_pixels: u64 },

    #[error("{0}")]
    Empty(&'static str),
}

impl AnalysisError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("No file uploaded")]
    NoFile,

    #[error("No file selected")]
    NoFilename,

    #[error("Unsupported file type")]
    UnsupportedType,

    #[error("File too large")]
    TooLarge,

    /// Too many requests already pending
    #[error("Server busy")]
    Busy,

    /// Anything unexpected; the message is passed through to the client
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::NoFile | ApiError::NoFilename | ApiError::UnsupportedType => 400,
            ApiError::TooLarge => 413,
            ApiError::Busy => 503,
            ApiError::Internal(_) => 500,
        }
    }
}

impl From<io::Error> for ApiError {
    fn from(err: io::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}
