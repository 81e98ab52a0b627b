//! Runtime configuration
//!
//! Plain structs owned by the [`crate::Analyzer`] and the HTTP server. The
//! binary fills them from CLI flags and `UNAI_*` environment variables; the
//! defaults here are what the service runs with when nothing is set.

use crate::analyzer::ScoringProfile;
use std::net::SocketAddr;
use std::path::PathBuf;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_UPLOAD_DIR: &str = "uploads";
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;
/// Requests held at once, running plus waiting for a worker
pub const DEFAULT_MAX_PENDING: usize = 64;

/// Longest stretch of audio decoded per file
pub const DEFAULT_MAX_AUDIO_SECS: u32 = 300;

/// Largest decoded image or video frame, in pixels (25 megapixels)
pub const DEFAULT_MAX_IMAGE_PIXELS: u64 = 25_000_000;

/// Locations of the external video tools
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTools {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Default for MediaTools {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerConfig {
    pub profile: ScoringProfile,
    /// Add the random demo term to simple-profile image scores
    pub demo_jitter: bool,
    pub tools: MediaTools,
    pub max_audio_secs: u32,
    /// Images and frames with more pixels than this are refused before decoding
    pub max_image_pixels: u64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            profile: ScoringProfile::Full,
            demo_jitter: false,
            tools: MediaTools::default(),
            max_audio_secs: DEFAULT_MAX_AUDIO_SECS,
            max_image_pixels: DEFAULT_MAX_IMAGE_PIXELS,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: u64,
    /// Size of the request worker pool (0 = one per CPU)
    pub workers: usize,
    /// Requests past this many pending are answered 503
    pub max_pending: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            upload_dir: PathBuf::from(DEFAULT_UPLOAD_DIR),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            workers: 0,
            max_pending: DEFAULT_MAX_PENDING,
        }
    }
}

/// MiB to bytes, pinned at `u64::MAX` for absurd inputs
pub fn mib_to_bytes(mib: u64) -> u64 {
    mib.saturating_mul(1024 * 1024)
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        match self.host.parse::<SocketAddr>() {
            Ok(addr) => addr.to_string(),
            Err(_) => format!("{}:{}", self.host, self.port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 5000);
        assert_eq!(config.max_upload_bytes, 52_428_800);
        assert_eq!(config.upload_dir, PathBuf::from("uploads"));
    }

    #[test]
    fn test_mib_to_bytes() {
        assert_eq!(mib_to_bytes(50), DEFAULT_MAX_UPLOAD_BYTES);
        assert_eq!(mib_to_bytes(0), 0);
        // 2^44 MiB is 2^64 bytes, one past u64::MAX
        assert_eq!(mib_to_bytes(1 << 44), u64::MAX);
        assert_eq!(mib_to_bytes(u64::MAX), u64::MAX);
    }

    #[test]
    fn test_analyzer_defaults_are_deterministic() {
        let config = AnalyzerConfig::default();
        assert_eq!(config.profile, ScoringProfile::Full);
        assert!(!config.demo_jitter);
        assert_eq!(config.tools.ffmpeg, PathBuf::from("ffmpeg"));
        assert_eq!(config.max_image_pixels, 25_000_000);
    }

    #[test]
    fn test_bind_addr_joins_host_and_port() {
        let config = ServerConfig { host: "127.0.0.1".into(), port: 8080, ..Default::default() };
        assert_eq!(config.bind_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_bind_addr_accepts_full_socket_addr() {
        let config = ServerConfig { host: "127.0.0.1:0".into(), ..Default::default() };
        assert_eq!(config.bind_addr(), "127.0.0.1:0");
    }
}
