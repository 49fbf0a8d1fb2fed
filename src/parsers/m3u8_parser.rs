//! M3U8 playlist parser
//!
//! Line scanner over the tag registry. The caller chooses whether the text is a
//! master or a media playlist; the parser classifies each directive against that
//! kind's tag set and feeds the matching builder.
//!
//! Cancellation is cooperative: the flag is checked once per line, before any
//! work is done for it, and a cancelled parse yields [`ParseOutcome::Cancelled`]
//! rather than an error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};
use url::Url;

use crate::core::error_handling::HlsResult;
use crate::parsers::builder::{MasterPlaylistBuilder, MediaPlaylistBuilder, PlaylistBuilder};
use crate::parsers::playlist::{MasterPlaylist, MediaPlaylist, PlaylistKind};
use crate::parsers::tags::{self, TAG_PREFIX};

#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Master(MasterPlaylist),
    Media(MediaPlaylist),
    Cancelled,
}

#[derive(Debug, Clone, Default)]
pub struct PlaylistParser {
    cancelled: Arc<AtomicBool>,
}

impl PlaylistParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share a cancellation flag with the owner of the parse, such as a task runner
    pub fn with_cancel_flag(cancelled: Arc<AtomicBool>) -> Self {
        Self { cancelled }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    /// Parse `text` as a playlist of the given kind.
    ///
    /// Relative URIs are kept verbatim; `base_url` is stored on the result and
    /// used when segment URLs are resolved.
    pub fn parse(
        &self,
        text: &str,
        kind: PlaylistKind,
        base_url: Option<&Url>,
    ) -> HlsResult<ParseOutcome> {
        match kind {
            PlaylistKind::Media => {
                let builder = MediaPlaylistBuilder::new(base_url.cloned());
                Ok(self
                    .scan(text, kind, builder)?
                    .map_or(ParseOutcome::Cancelled, ParseOutcome::Media))
            }
            PlaylistKind::Master => {
                let builder = MasterPlaylistBuilder::new(base_url.cloned());
                Ok(self
                    .scan(text, kind, builder)?
                    .map_or(ParseOutcome::Cancelled, ParseOutcome::Master))
            }
        }
    }

    /// `Ok(None)` means the scan was cancelled
    fn scan<B: PlaylistBuilder>(
        &self,
        text: &str,
        kind: PlaylistKind,
        mut builder: B,
    ) -> HlsResult<Option<B::Output>> {
        let lines: Vec<&str> = text.lines().collect();
        let mut cursor = 0;
        let mut applied = 0usize;

        while cursor < lines.len() {
            if self.is_cancelled() {
                debug!(line = cursor + 1, "playlist parse cancelled");
                return Ok(None);
            }

            let line = lines[cursor].trim();
            cursor += 1;

            if line.is_empty() || !line.starts_with(TAG_PREFIX) {
                continue;
            }

            let name = tags::tag_name(line);
            let Some(definition) = tags::lookup(name).filter(|def| def.admits(kind)) else {
                trace!(name, ?kind, "ignoring tag outside the playlist tag set");
                continue;
            };

            let extra = definition.extra_line_count(&lines[cursor..]);
            let tag = if extra == 0 {
                definition.create(line)?
            } else {
                let mut block = Vec::with_capacity(extra + 1);
                block.push(line);
                block.extend(lines[cursor..cursor + extra].iter().map(|l| l.trim()));
                definition.create(&block.join("\n"))?
            };
            cursor += extra;

            builder.apply(tag);
            applied += 1;
        }

        debug!(?kind, tags = applied, "playlist scan finished");
        builder.build().map(Some)
    }
}

/// Parse with a fresh, never-cancelled parser
pub fn parse_playlist(text: &str, kind: PlaylistKind, base_url: Option<&Url>) -> HlsResult<ParseOutcome> {
    PlaylistParser::new().parse(text, kind, base_url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error_handling::HlsError;
    use crate::parsers::playlist::KeyMethod;

    const SIMPLE_MEDIA: &str = "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:10\n#EXT-X-MEDIA-SEQUENCE:0\n#EXTINF:9.009,\nfileSequence0.ts\n#EXT-X-ENDLIST";

    fn media(text: &str) -> MediaPlaylist {
        match parse_playlist(text, PlaylistKind::Media, None).unwrap() {
            ParseOutcome::Media(playlist) => playlist,
            other => panic!("expected media playlist, got {other:?}"),
        }
    }

    fn master(text: &str) -> MasterPlaylist {
        match parse_playlist(text, PlaylistKind::Master, None).unwrap() {
            ParseOutcome::Master(playlist) => playlist,
            other => panic!("expected master playlist, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_simple_media_playlist() {
        let playlist = media(SIMPLE_MEDIA);
        assert_eq!(playlist.target_duration, 10);
        assert_eq!(playlist.media_sequence, 0);
        assert_eq!(playlist.version, Some(3));
        assert_eq!(playlist.segments.len(), 1);
        assert!((playlist.segments[0].duration - 9.009).abs() < 1e-6);
        assert_eq!(playlist.segments[0].uri, "fileSequence0.ts");
        assert!(playlist.end_list);
    }

    #[test]
    fn test_parse_is_idempotent_and_counts_segments() {
        let text = "#EXTM3U\n\
#EXT-X-TARGETDURATION:4\n\
#EXT-X-PLAYLIST-TYPE:VOD\n\
#EXTINF:4.000,\n\
a.ts\n\
\n\
#EXTINF:3.5,Second\n\
#EXT-X-BITRATE:900\n\
b.ts\n\
# a plain comment\n\
#EXT-X-DISCONTINUITY\n\
#EXTINF:2,\n\
https://cdn.example.com/c.ts\n\
#EXT-X-ENDLIST\n";

        let first = media(text);
        let second = media(text);
        assert_eq!(first, second);
        assert_eq!(first.segments.len(), text.matches("#EXTINF").count());
        assert_eq!(first.segments[1].title.as_deref(), Some("Second"));
        assert_eq!(first.segments[1].bitrate, Some(900));
        assert!((first.total_duration() - 9.5).abs() < 1e-9);
    }

    #[test]
    fn test_stray_uri_lines_are_inert() {
        let text = "#EXTM3U\n#EXT-X-TARGETDURATION:4\norphan.ts\n#EXTINF:4,\na.ts\n";
        let playlist = media(text);
        assert_eq!(playlist.segments.len(), 1);
        assert_eq!(playlist.segments[0].uri, "a.ts");
    }

    #[test]
    fn test_master_variants_keep_order() {
        let text = "#EXTM3U\n\
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"aud\",NAME=\"English\",URI=\"audio/en.m3u8\"\n\
#EXT-X-STREAM-INF:BANDWIDTH=1280000,RESOLUTION=640x360\n\
low/index.m3u8\n\
#EXT-X-STREAM-INF:BANDWIDTH=2560000,RESOLUTION=1280x720,AUDIO=\"aud\"\n\
mid/index.m3u8\n\
#EXT-X-STREAM-INF:BANDWIDTH=7680000\n\
high/index.m3u8\n";

        let playlist = master(text);
        let uris: Vec<&str> = playlist
            .stream_variants
            .iter()
            .map(|v| v.uri.as_str())
            .collect();
        assert_eq!(uris, ["low/index.m3u8", "mid/index.m3u8", "high/index.m3u8"]);
        assert_eq!(playlist.stream_variants[1].audio_group.as_deref(), Some("aud"));
        assert_eq!(playlist.media_groups.len(), 1);
        assert_eq!(playlist.media_groups[0].name.as_deref(), Some("English"));
    }

    #[test]
    fn test_media_tags_are_ignored_in_master_mode() {
        let text = "#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXT-X-STREAM-INF:BANDWIDTH=1\nv.m3u8\n";
        assert_eq!(master(text).stream_variants.len(), 1);
    }

    #[test]
    fn test_missing_target_duration_is_malformed() {
        let err = parse_playlist("#EXTM3U\n#EXTINF:4,\na.ts\n", PlaylistKind::Media, None)
            .unwrap_err();
        assert!(matches!(err, HlsError::MalformedPlaylist { .. }));
    }

    #[test]
    fn test_text_without_tags_is_malformed() {
        let err = parse_playlist("just some text\n", PlaylistKind::Media, None).unwrap_err();
        assert!(matches!(err, HlsError::MalformedPlaylist { .. }));
    }

    #[test]
    fn test_key_tags_are_collected() {
        let text = "#EXTM3U\n#EXT-X-TARGETDURATION:10\n#EXT-X-KEY:METHOD=AES-128,URI=\"https://x/key\",IV=0x00000000000000000000000000000001\n#EXTINF:10,\ns0.ts\n";
        let playlist = media(text);
        assert_eq!(playlist.key_segments.len(), 1);
        assert_eq!(playlist.key_segments[0].method, KeyMethod::Aes128);
        let key = playlist.key_for(&playlist.segments[0]).unwrap();
        assert_eq!(key.iv_bytes().unwrap()[15], 1);
    }

    #[test]
    fn test_invalid_key_fails_the_parse() {
        let text = "#EXTM3U\n#EXT-X-TARGETDURATION:10\n#EXT-X-KEY:METHOD=AES-128\n#EXTINF:10,\ns0.ts\n";
        let err = parse_playlist(text, PlaylistKind::Media, None).unwrap_err();
        assert!(matches!(err, HlsError::InvalidTag { .. }));
    }

    #[test]
    fn test_cancel_before_parse_yields_cancelled() {
        let parser = PlaylistParser::new();
        parser.cancel();
        let outcome = parser
            .parse(SIMPLE_MEDIA, PlaylistKind::Media, None)
            .unwrap();
        assert_eq!(outcome, ParseOutcome::Cancelled);

        // even input that would fail to build is never reached
        let outcome = parser
            .parse("#EXT-X-KEY:METHOD=AES-128", PlaylistKind::Media, None)
            .unwrap();
        assert_eq!(outcome, ParseOutcome::Cancelled);

        parser.reset();
        assert!(matches!(
            parser.parse(SIMPLE_MEDIA, PlaylistKind::Media, None).unwrap(),
            ParseOutcome::Media(_)
        ));
    }

    #[test]
    fn test_shared_cancel_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let parser = PlaylistParser::with_cancel_flag(flag.clone());
        flag.store(true, Ordering::SeqCst);
        assert!(parser.is_cancelled());
    }

    #[test]
    fn test_segment_urls_resolve_against_base() {
        let base = Url::parse("https://example.com/vod/").unwrap();
        let ParseOutcome::Media(playlist) =
            parse_playlist(SIMPLE_MEDIA, PlaylistKind::Media, Some(&base)).unwrap()
        else {
            panic!("expected media playlist");
        };
        let urls = playlist.segment_urls().unwrap();
        assert_eq!(urls[0].as_str(), "https://example.com/vod/fileSequence0.ts");
    }
}
