//! Playlist parsing modules
//!
//! Tag registry, builders and the line scanner that turns M3U8 text into typed
//! master or media playlists.

pub mod builder;
pub mod m3u8_parser;
pub mod playlist;
pub mod rewrite;
pub mod tags;

// Re-export commonly used parser types
pub use m3u8_parser::{parse_playlist, ParseOutcome, PlaylistParser};
pub use playlist::*;
pub use rewrite::{
    key_uris, localize_segment_uris, normalize_iv, replace_key_uris, rewrite_first_key_line,
};
pub use tags::{create_tag, Tag, TagKind, TagValue};
