//! Media kind detection and upload filename handling
//!
//! Uploads are classified by content first (magic bytes), then by filename
//! extension when the content is not recognized. Only the extensions below
//! are accepted on the fallback path.

use serde::Serialize;
use std::fmt;
use std::io;
use std::path::Path;

pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp"];
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "webm"];
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "ogg", "m4a"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Unknown,
}

impl MediaKind {
    /// Classify by filename extension against the allow-lists
    pub fn from_extension(filename: &str) -> Self {
        let Some(ext) = extension_of(filename) else {
            return MediaKind::Unknown;
        };
        let ext = ext.as_str();

        if IMAGE_EXTENSIONS.contains(&ext) {
            MediaKind::Image
        } else if VIDEO_EXTENSIONS.contains(&ext) {
            MediaKind::Video
        } else if AUDIO_EXTENSIONS.contains(&ext) {
            MediaKind::Audio
        } else {
            MediaKind::Unknown
        }
    }

    /// Classify from the leading bytes of a file
    pub fn sniff(header: &[u8]) -> Self {
        Self::from_sniffed(infer::get(header))
    }

    fn from_sniffed(sniffed: Option<infer::Type>) -> Self {
        match sniffed.map(|t| t.matcher_type()) {
            Some(infer::MatcherType::Image) => MediaKind::Image,
            Some(infer::MatcherType::Video) => MediaKind::Video,
            Some(infer::MatcherType::Audio) => MediaKind::Audio,
            _ => MediaKind::Unknown,
        }
    }

    /// Sniffed kind wins; the extension is only consulted when sniffing
    /// does not recognize a media type.
    pub fn detect(header: &[u8], filename: &str) -> Self {
        match Self::sniff(header) {
            MediaKind::Unknown => Self::from_extension(filename),
            kind => kind,
        }
    }

    /// Same as [`MediaKind::detect`], reading the header from disk
    pub fn detect_path(path: &Path, filename: &str) -> io::Result<Self> {
        Ok(match Self::from_sniffed(infer::get_from_path(path)?) {
            MediaKind::Unknown => Self::from_extension(filename),
            kind => kind,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lowercased extension after the last dot, if any
pub fn extension_of(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Reduce an uploaded filename to something safe to log and echo back.
///
/// Path separators become word breaks, whitespace runs become `_`, anything
/// outside `[A-Za-z0-9_.-]` is dropped, and leading/trailing `.`/`_` are
/// stripped. May return an empty string (e.g. for `"../.."`).
pub fn secure_filename(filename: &str) -> String {
    let spaced: String = filename
        .chars()
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();

    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");

    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();

    kept.trim_matches(|c| c == '.' || c == '_').to_string()
}
