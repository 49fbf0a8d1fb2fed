//! Parsed playlist models
//!
//! These are the immutable results published by the parser. Segment order is
//! playback order and is never changed after parsing.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use url::Url;

use crate::core::error_handling::{errors, HlsResult};

/// Attribute key to unquoted value
pub type Attributes = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaylistKind {
    Master,
    Media,
}

impl PlaylistKind {
    /// Guess the playlist kind from its text: variant streams only appear in
    /// master playlists.
    pub fn detect(text: &str) -> Self {
        let is_master = text
            .lines()
            .any(|line| line.trim_start().starts_with("#EXT-X-STREAM-INF"));
        if is_master {
            Self::Master
        } else {
            Self::Media
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaylistType {
    Vod,
    Event,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyMethod {
    None,
    Aes128,
    SampleAes,
    Other(String),
}

impl KeyMethod {
    pub fn parse(value: &str) -> Self {
        match value {
            "NONE" => Self::None,
            "AES-128" => Self::Aes128,
            "SAMPLE-AES" => Self::SampleAes,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for KeyMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("NONE"),
            Self::Aes128 => f.write_str("AES-128"),
            Self::SampleAes => f.write_str("SAMPLE-AES"),
            Self::Other(method) => f.write_str(method),
        }
    }
}

/// One `#EXT-X-KEY` directive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySegment {
    pub method: KeyMethod,
    pub uri: Option<String>,
    /// Hex IV as written in the playlist, `0x` prefix included
    pub iv: Option<String>,
    pub attributes: Attributes,
}

impl KeySegment {
    pub fn is_encrypted(&self) -> bool {
        self.method != KeyMethod::None
    }

    /// The IV as 16 raw bytes, if one was given
    pub fn iv_bytes(&self) -> Option<[u8; 16]> {
        let iv = self.iv.as_deref()?;
        let digits = iv
            .strip_prefix("0x")
            .or_else(|| iv.strip_prefix("0X"))
            .unwrap_or(iv);
        let decoded = hex::decode(digits).ok()?;
        decoded.try_into().ok()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaSegment {
    pub duration: f64,
    pub title: Option<String>,
    pub uri: String,
    pub bitrate: Option<u64>,
    /// Media sequence number of this segment
    pub sequence: u64,
    /// Index into `MediaPlaylist::key_segments` of the key in effect
    pub key_index: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaPlaylist {
    pub base_url: Option<Url>,
    pub version: Option<u32>,
    pub target_duration: u64,
    pub media_sequence: u64,
    pub playlist_type: Option<PlaylistType>,
    pub segments: Vec<MediaSegment>,
    pub key_segments: Vec<KeySegment>,
    pub end_list: bool,
}

impl MediaPlaylist {
    pub fn total_duration(&self) -> f64 {
        self.segments.iter().map(|s| s.duration).sum()
    }

    /// Any key other than `METHOD=NONE`
    pub fn is_encrypted(&self) -> bool {
        self.key_segments.iter().any(KeySegment::is_encrypted)
    }

    pub fn key_for(&self, segment: &MediaSegment) -> Option<&KeySegment> {
        segment.key_index.and_then(|i| self.key_segments.get(i))
    }

    /// Every segment URI resolved against the base URL, in playback order
    pub fn segment_urls(&self) -> HlsResult<Vec<Url>> {
        self.segments
            .iter()
            .map(|segment| resolve_uri(self.base_url.as_ref(), &segment.uri))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamVariant {
    pub bandwidth: u64,
    pub resolution: Option<Resolution>,
    pub audio_group: Option<String>,
    pub codecs: Option<String>,
    pub uri: String,
    pub attributes: Attributes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaGroup {
    pub media_type: String,
    pub group_id: String,
    pub language: Option<String>,
    pub name: Option<String>,
    pub uri: Option<String>,
    pub attributes: Attributes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterPlaylist {
    pub base_url: Option<Url>,
    pub version: Option<u32>,
    pub stream_variants: Vec<StreamVariant>,
    pub media_groups: Vec<MediaGroup>,
}

/// Resolve a playlist URI; absolute URIs pass through untouched
pub fn resolve_uri(base: Option<&Url>, uri: &str) -> HlsResult<Url> {
    match Url::parse(uri) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let base = base.ok_or_else(|| errors::missing_parameter("base_url"))?;
            base.join(uri)
                .map_err(|e| errors::invalid_url(uri, e.to_string()))
        }
        Err(e) => Err(errors::invalid_url(uri, e.to_string())),
    }
}

/// Directory URL of a playlist URL, used as the base for relative segment URIs
pub fn base_url_of(url: &Url) -> HlsResult<Url> {
    url.join(".")
        .map_err(|e| errors::invalid_url(url.as_str(), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error_handling::HlsError;

    #[test]
    fn test_relative_url_resolution() {
        let base = Url::parse("https://example.com/videos/").unwrap();
        let resolved = resolve_uri(Some(&base), "segment000.ts").unwrap();
        assert_eq!(resolved.as_str(), "https://example.com/videos/segment000.ts");

        let absolute = resolve_uri(Some(&base), "https://cdn.example.com/a.ts").unwrap();
        assert_eq!(absolute.as_str(), "https://cdn.example.com/a.ts");
    }

    #[test]
    fn relative_uri_without_base_is_missing_parameter() {
        let err = resolve_uri(None, "segment000.ts").unwrap_err();
        assert!(matches!(err, HlsError::MissingParameter { ref parameter } if parameter == "base_url"));
    }

    #[test]
    fn base_url_drops_file_and_query() {
        let url = Url::parse("https://example.com/hls/v1/index.m3u8?token=abc").unwrap();
        assert_eq!(base_url_of(&url).unwrap().as_str(), "https://example.com/hls/v1/");
    }

    #[test]
    fn iv_bytes_accepts_prefixed_hex() {
        let key = KeySegment {
            method: KeyMethod::Aes128,
            uri: Some("key.bin".into()),
            iv: Some("0X99b74007b6254e4bd1c6e03631cad15b".into()),
            attributes: Attributes::new(),
        };
        let iv = key.iv_bytes().unwrap();
        assert_eq!(iv[0], 0x99);
        assert_eq!(iv[15], 0x5b);
    }

    #[test]
    fn detects_master_playlists() {
        let master = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1280000\nlow.m3u8\n";
        assert_eq!(PlaylistKind::detect(master), PlaylistKind::Master);
        assert_eq!(
            PlaylistKind::detect("#EXTM3U\n#EXTINF:4,\na.ts\n"),
            PlaylistKind::Media
        );
    }
}
