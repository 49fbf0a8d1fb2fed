//! Playlist builders
//!
//! A builder is fed tags in document order and produces the immutable playlist on
//! `build`. Builders are local to one parse call and never shared.

use url::Url;

use crate::core::error_handling::{errors, HlsResult};
use crate::parsers::playlist::{
    KeySegment, MasterPlaylist, MediaGroup, MediaPlaylist, MediaSegment, PlaylistType,
    StreamVariant,
};
use crate::parsers::tags::{InfBlock, Tag, TagValue, EXT_X_TARGETDURATION};

pub trait PlaylistBuilder {
    type Output;

    fn apply(&mut self, tag: Tag);

    fn build(self) -> HlsResult<Self::Output>;
}

#[derive(Debug, Default)]
pub struct MediaPlaylistBuilder {
    base_url: Option<Url>,
    version: Option<u32>,
    target_duration: Option<u64>,
    media_sequence: Option<u64>,
    playlist_type: Option<PlaylistType>,
    segments: Vec<(InfBlock, Option<usize>)>,
    key_segments: Vec<KeySegment>,
    end_list: bool,
    meaningful_tags: usize,
}

impl MediaPlaylistBuilder {
    pub fn new(base_url: Option<Url>) -> Self {
        Self {
            base_url,
            ..Self::default()
        }
    }
}

impl PlaylistBuilder for MediaPlaylistBuilder {
    type Output = MediaPlaylist;

    fn apply(&mut self, tag: Tag) {
        if tag.value != TagValue::Header {
            self.meaningful_tags += 1;
        }
        match tag.value {
            TagValue::Header => {}
            TagValue::Version(version) => self.version = Some(version),
            TagValue::TargetDuration(duration) => self.target_duration = Some(duration),
            TagValue::MediaSequence(sequence) => self.media_sequence = Some(sequence),
            TagValue::PlaylistType(kind) => self.playlist_type = Some(kind),
            TagValue::Key(key) => self.key_segments.push(key),
            TagValue::Inf(block) => {
                // the most recent key applies to every following segment
                let key_index = self.key_segments.len().checked_sub(1);
                self.segments.push((block, key_index));
            }
            TagValue::EndList => self.end_list = true,
            TagValue::StreamInf(_) | TagValue::Media(_) => {}
        }
    }

    fn build(self) -> HlsResult<MediaPlaylist> {
        if self.meaningful_tags == 0 {
            return Err(errors::malformed_playlist(
                "no playlist tags found in media playlist",
            ));
        }
        let target_duration = self.target_duration.ok_or_else(|| {
            errors::malformed_playlist(format!("missing required tag {}", EXT_X_TARGETDURATION))
        })?;
        let media_sequence = self.media_sequence.unwrap_or(0);

        let segments = self
            .segments
            .into_iter()
            .enumerate()
            .map(|(index, (block, key_index))| MediaSegment {
                duration: block.duration,
                title: block.title,
                uri: block.uri,
                bitrate: block.bitrate,
                sequence: media_sequence + index as u64,
                key_index,
            })
            .collect();

        Ok(MediaPlaylist {
            base_url: self.base_url,
            version: self.version,
            target_duration,
            media_sequence,
            playlist_type: self.playlist_type,
            segments,
            key_segments: self.key_segments,
            end_list: self.end_list,
        })
    }
}

#[derive(Debug, Default)]
pub struct MasterPlaylistBuilder {
    base_url: Option<Url>,
    version: Option<u32>,
    stream_variants: Vec<StreamVariant>,
    media_groups: Vec<MediaGroup>,
}

impl MasterPlaylistBuilder {
    pub fn new(base_url: Option<Url>) -> Self {
        Self {
            base_url,
            ..Self::default()
        }
    }
}

impl PlaylistBuilder for MasterPlaylistBuilder {
    type Output = MasterPlaylist;

    fn apply(&mut self, tag: Tag) {
        match tag.value {
            TagValue::Version(version) => self.version = Some(version),
            TagValue::StreamInf(variant) => self.stream_variants.push(variant),
            TagValue::Media(group) => self.media_groups.push(group),
            _ => {}
        }
    }

    fn build(self) -> HlsResult<MasterPlaylist> {
        if self.stream_variants.is_empty() && self.media_groups.is_empty() {
            return Err(errors::malformed_playlist(
                "master playlist declares no stream variants or media groups",
            ));
        }
        Ok(MasterPlaylist {
            base_url: self.base_url,
            version: self.version,
            stream_variants: self.stream_variants,
            media_groups: self.media_groups,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error_handling::HlsError;
    use crate::parsers::tags::create_tag;

    fn tag(name: &str, text: &str) -> Tag {
        create_tag(name, text).unwrap().unwrap()
    }

    #[test]
    fn header_alone_is_malformed() {
        let mut builder = MediaPlaylistBuilder::new(None);
        builder.apply(tag("#EXTM3U", "#EXTM3U"));
        assert!(matches!(
            builder.build(),
            Err(HlsError::MalformedPlaylist { .. })
        ));
    }

    #[test]
    fn target_duration_is_required() {
        let mut builder = MediaPlaylistBuilder::new(None);
        builder.apply(tag("#EXTINF", "#EXTINF:4.0,\na.ts"));
        let err = builder.build().unwrap_err();
        assert!(err.to_string().contains("#EXT-X-TARGETDURATION"));
    }

    #[test]
    fn segments_track_sequence_and_active_key() {
        let mut builder = MediaPlaylistBuilder::new(None);
        builder.apply(tag("#EXT-X-TARGETDURATION", "#EXT-X-TARGETDURATION:6"));
        builder.apply(tag("#EXT-X-MEDIA-SEQUENCE", "#EXT-X-MEDIA-SEQUENCE:40"));
        builder.apply(tag("#EXTINF", "#EXTINF:6.0,\na.ts"));
        builder.apply(tag("#EXT-X-KEY", r#"#EXT-X-KEY:METHOD=AES-128,URI="k1""#));
        builder.apply(tag("#EXTINF", "#EXTINF:6.0,\nb.ts"));
        builder.apply(tag("#EXT-X-KEY", "#EXT-X-KEY:METHOD=NONE"));
        builder.apply(tag("#EXTINF", "#EXTINF:6.0,\nc.ts"));

        let playlist = builder.build().unwrap();
        let sequences: Vec<u64> = playlist.segments.iter().map(|s| s.sequence).collect();
        assert_eq!(sequences, vec![40, 41, 42]);
        assert_eq!(playlist.segments[0].key_index, None);
        assert_eq!(playlist.segments[1].key_index, Some(0));
        assert_eq!(playlist.segments[2].key_index, Some(1));
        assert!(playlist.is_encrypted());
        assert!(!playlist.end_list);
    }

    #[test]
    fn master_without_variants_is_malformed() {
        let mut builder = MasterPlaylistBuilder::new(None);
        builder.apply(tag("#EXTM3U", "#EXTM3U"));
        builder.apply(tag("#EXT-X-VERSION", "#EXT-X-VERSION:4"));
        assert!(builder.build().is_err());
    }
}
