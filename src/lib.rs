//! UnAI - Heuristic detection of AI-generated media
//!
//! UnAI takes an image, video or audio file and estimates whether it was
//! produced by a generative model. There is no trained model anywhere in
//! here: each medium is measured with a few classic signal statistics and
//! every statistic that crosses a fixed threshold adds to a score.
//!
//! # Overview
//!
//! Generated media tends to be "too clean". Images come out with smoother
//! edges, flatter tonal ranges and statistically similar regions. Generated
//! audio tends to have a stable spectrum and beats locked to a perfect grid.
//! None of these is proof on its own, which is why the result is a
//! confidence and never exceeds 95%.
//!
//! # Detection Methods
//!
//! 1. **Images**: pixel variance, Canny edge density, variance of the log
//!    2D spectrum, local binary pattern texture variance, and how alike the
//!    four quadrants are.
//!
//! 2. **Video**: up to ten frames sampled from the first 30 seconds, each
//!    scored as an image. Frames that all score alike get a bonus.
//!
//! 3. **Audio**: spectral centroid variance, MFCC variance, beat interval
//!    regularity and spectral rolloff.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use unai::{Analyzer, MediaKind};
//!
//! let analyzer = Analyzer::new();
//! let path = Path::new("suspicious.png");
//! let kind = MediaKind::detect_path(path, "suspicious.png").unwrap();
//! let verdict = analyzer.analyze(path, kind);
//!
//! if let Some(err) = &verdict.error {
//!     println!("Couldn't analyze: {}", err);
//! } else if verdict.is_ai_generated {
//!     println!("Probably generated ({:.0}%)", verdict.confidence);
//! } else {
//!     println!("Probably authentic ({:.0}%)", verdict.confidence);
//! }
//! println!("Flags: {:?}", verdict.flags);
//! ```
//!
//! # Scoring System
//!
//! | Raw score | Confidence | Verdict |
//! |-----------|------------|---------|
//! | 0.0 - 0.5 | 0 - 50% | not AI-generated |
//! | above 0.5 | 50 - 95% | AI-generated |
//!
//! # Modules
//!
//! - [`analyzer`]: Per-medium scorers and the [`Analyzer`] front end
//! - [`media`]: File type detection and upload filename sanitizing
//! - [`serve`]: The HTTP API (`/api/analyze`, `/api/health`)
//! - [`config`]: Server and analyzer settings
//! - [`error`]: Error types

pub mod analyzer;
pub mod config;
pub mod error;
pub mod media;
pub mod serve;

pub use analyzer::{Analyzer, FeatureSet, ScoringProfile, Verdict};
pub use config::{AnalyzerConfig, MediaTools, ServerConfig};
pub use error::{AnalysisError, ApiError};
pub use media::MediaKind;
