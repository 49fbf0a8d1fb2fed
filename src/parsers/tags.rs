//! M3U8 tag model and registry
//!
//! Every supported directive is a [`TagDefinition`] in a static lookup table keyed
//! by name. A definition knows its [`TagKind`], the playlist kinds it belongs to
//! and a pure constructor turning the raw text into a typed [`TagValue`].
//! Names missing from the table are not errors: the grammar is open-ended and
//! the parser skips them.

use tracing::trace;

use crate::core::error_handling::{errors, HlsResult};
use crate::parsers::playlist::{
    Attributes, KeyMethod, KeySegment, MediaGroup, PlaylistKind, PlaylistType, Resolution,
    StreamVariant,
};

/// Every directive starts with this prefix
pub const TAG_PREFIX: &str = "#EXT";

pub const EXTM3U: &str = "#EXTM3U";
pub const EXT_X_VERSION: &str = "#EXT-X-VERSION";
pub const EXT_X_TARGETDURATION: &str = "#EXT-X-TARGETDURATION";
pub const EXT_X_MEDIA_SEQUENCE: &str = "#EXT-X-MEDIA-SEQUENCE";
pub const EXT_X_PLAYLIST_TYPE: &str = "#EXT-X-PLAYLIST-TYPE";
pub const EXT_X_KEY: &str = "#EXT-X-KEY";
pub const EXTINF: &str = "#EXTINF";
pub const EXT_X_BITRATE: &str = "#EXT-X-BITRATE";
pub const EXT_X_STREAM_INF: &str = "#EXT-X-STREAM-INF";
pub const EXT_X_MEDIA: &str = "#EXT-X-MEDIA";
pub const EXT_X_ENDLIST: &str = "#EXT-X-ENDLIST";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    /// Bare name, no payload
    Simple,
    /// `NAME:<value>` with a typed value
    SingleValue,
    /// `NAME:K=V,K="V",...`
    Attributed,
    /// First line plus a number of following physical lines
    Multiline,
}

/// Which playlist kinds accept a tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagScope {
    Any,
    Master,
    Media,
}

impl TagScope {
    fn admits(self, kind: PlaylistKind) -> bool {
        matches!(
            (self, kind),
            (TagScope::Any, _)
                | (TagScope::Master, PlaylistKind::Master)
                | (TagScope::Media, PlaylistKind::Media)
        )
    }
}

/// How an attribute list is split and validated
#[derive(Debug, Clone, Copy)]
pub struct AttributeSpec {
    pub separator: char,
    /// Characters trimmed from both ends of every value
    pub trim: &'static [char],
    pub mandatory: &'static [&'static str],
    pub min_count: usize,
}

const QUOTES: &[char] = &['"'];

const KEY_ATTRIBUTES: AttributeSpec = AttributeSpec {
    separator: ',',
    trim: QUOTES,
    mandatory: &["METHOD"],
    min_count: 1,
};

const STREAM_INF_ATTRIBUTES: AttributeSpec = AttributeSpec {
    separator: ',',
    trim: QUOTES,
    mandatory: &["BANDWIDTH"],
    min_count: 1,
};

const MEDIA_ATTRIBUTES: AttributeSpec = AttributeSpec {
    separator: ',',
    trim: QUOTES,
    mandatory: &["TYPE", "GROUP-ID"],
    min_count: 2,
};

/// Typed payload of a recognised directive
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    Header,
    Version(u32),
    TargetDuration(u64),
    MediaSequence(u64),
    PlaylistType(PlaylistType),
    Key(KeySegment),
    Inf(InfBlock),
    StreamInf(StreamVariant),
    Media(MediaGroup),
    EndList,
}

/// `#EXTINF` together with its optional `#EXT-X-BITRATE` and URI lines
#[derive(Debug, Clone, PartialEq)]
pub struct InfBlock {
    pub duration: f64,
    pub title: Option<String>,
    pub bitrate: Option<u64>,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub name: &'static str,
    pub kind: TagKind,
    pub raw: String,
    pub value: TagValue,
}

pub struct TagDefinition {
    pub name: &'static str,
    pub kind: TagKind,
    pub scope: TagScope,
    construct: fn(&str) -> HlsResult<TagValue>,
    /// Multiline tags only: how many lines after the first belong to the tag
    extra_lines: fn(&[&str]) -> usize,
}

impl TagDefinition {
    /// Build the tag from its (possibly multi-line, `\n`-joined) text
    pub fn create(&'static self, text: &str) -> HlsResult<Tag> {
        let value = (self.construct)(text)?;
        Ok(Tag {
            name: self.name,
            kind: self.kind,
            raw: text.to_string(),
            value,
        })
    }

    /// Physical lines consumed after the first one, decided by looking ahead
    pub fn extra_line_count(&self, following: &[&str]) -> usize {
        match self.kind {
            TagKind::Multiline => (self.extra_lines)(following),
            _ => 0,
        }
    }

    pub fn admits(&self, kind: PlaylistKind) -> bool {
        self.scope.admits(kind)
    }
}

static REGISTRY: &[TagDefinition] = &[
    TagDefinition {
        name: EXTM3U,
        kind: TagKind::Simple,
        scope: TagScope::Any,
        construct: |_| Ok(TagValue::Header),
        extra_lines: no_extra_lines,
    },
    TagDefinition {
        name: EXT_X_VERSION,
        kind: TagKind::SingleValue,
        scope: TagScope::Any,
        construct: |text| parse_integer(EXT_X_VERSION, text).map(TagValue::Version),
        extra_lines: no_extra_lines,
    },
    TagDefinition {
        name: EXT_X_TARGETDURATION,
        kind: TagKind::SingleValue,
        scope: TagScope::Media,
        construct: |text| parse_integer(EXT_X_TARGETDURATION, text).map(TagValue::TargetDuration),
        extra_lines: no_extra_lines,
    },
    TagDefinition {
        name: EXT_X_MEDIA_SEQUENCE,
        kind: TagKind::SingleValue,
        scope: TagScope::Media,
        construct: |text| parse_integer(EXT_X_MEDIA_SEQUENCE, text).map(TagValue::MediaSequence),
        extra_lines: no_extra_lines,
    },
    TagDefinition {
        name: EXT_X_PLAYLIST_TYPE,
        kind: TagKind::SingleValue,
        scope: TagScope::Media,
        construct: construct_playlist_type,
        extra_lines: no_extra_lines,
    },
    TagDefinition {
        name: EXT_X_KEY,
        kind: TagKind::Attributed,
        scope: TagScope::Media,
        construct: construct_key,
        extra_lines: no_extra_lines,
    },
    TagDefinition {
        name: EXTINF,
        kind: TagKind::Multiline,
        scope: TagScope::Media,
        construct: construct_inf,
        extra_lines: lines_through_uri,
    },
    TagDefinition {
        name: EXT_X_STREAM_INF,
        kind: TagKind::Multiline,
        scope: TagScope::Master,
        construct: construct_stream_inf,
        extra_lines: lines_through_uri,
    },
    TagDefinition {
        name: EXT_X_MEDIA,
        kind: TagKind::Attributed,
        scope: TagScope::Master,
        construct: construct_media,
        extra_lines: no_extra_lines,
    },
    TagDefinition {
        name: EXT_X_ENDLIST,
        kind: TagKind::Simple,
        scope: TagScope::Media,
        construct: |_| Ok(TagValue::EndList),
        extra_lines: no_extra_lines,
    },
];

/// Look up a definition by exact name
pub fn lookup(name: &str) -> Option<&'static TagDefinition> {
    REGISTRY.iter().find(|def| def.name == name)
}

/// Name part of a directive line (`#EXT-X-KEY:METHOD=NONE` -> `#EXT-X-KEY`)
pub fn tag_name(line: &str) -> &str {
    line.split_once(':').map_or(line, |(name, _)| name).trim_end()
}

/// Build the tag called `name` from `text`. Unknown names yield `Ok(None)`.
pub fn create_tag(name: &str, text: &str) -> HlsResult<Option<Tag>> {
    match lookup(name) {
        Some(def) => def.create(text).map(Some),
        None => {
            trace!(name, "skipping unknown tag");
            Ok(None)
        }
    }
}

fn no_extra_lines(_following: &[&str]) -> usize {
    0
}

/// Consume following lines up to and including the first URI line. Tag lines in
/// between (such as `#EXT-X-BITRATE`) and blank lines belong to the block; the
/// scan stops early at the next segment or variant directive.
fn lines_through_uri(following: &[&str]) -> usize {
    for (index, line) in following.iter().enumerate() {
        let line = line.trim();
        if line.starts_with(EXTINF) || line.starts_with(EXT_X_STREAM_INF) {
            return index;
        }
        if !line.is_empty() && !line.starts_with('#') {
            return index + 1;
        }
    }
    following.len()
}

/// Payload after `NAME:`, trimmed
fn payload<'a>(name: &str, text: &'a str) -> &'a str {
    let first_line = text.lines().next().unwrap_or("");
    first_line
        .strip_prefix(name)
        .map(|rest| rest.strip_prefix(':').unwrap_or(rest))
        .unwrap_or(first_line)
        .trim()
}

fn parse_integer<T: std::str::FromStr>(name: &str, text: &str) -> HlsResult<T> {
    let value = payload(name, text);
    value
        .parse::<T>()
        .map_err(|_| errors::invalid_tag(name, "integer", value))
}

fn parse_float(name: &str, value: &str) -> HlsResult<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
        .ok_or_else(|| errors::invalid_tag(name, "non-negative decimal", value))
}

fn construct_playlist_type(text: &str) -> HlsResult<TagValue> {
    match payload(EXT_X_PLAYLIST_TYPE, text) {
        "VOD" => Ok(TagValue::PlaylistType(PlaylistType::Vod)),
        "EVENT" => Ok(TagValue::PlaylistType(PlaylistType::Event)),
        other => Err(errors::invalid_tag(EXT_X_PLAYLIST_TYPE, "VOD or EVENT", other)),
    }
}

/// Split on `separator`, treating double-quoted runs as atomic
pub fn split_outside_quotes(input: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (index, ch) in input.char_indices() {
        if ch == '"' {
            in_quotes = !in_quotes;
        } else if ch == separator && !in_quotes {
            parts.push(&input[start..index]);
            start = index + ch.len_utf8();
        }
    }
    parts.push(&input[start..]);
    parts
}

/// Parse an attribute list according to `layout`.
///
/// A list that yields no attributes at all is rejected whatever `min_count`
/// says: that only happens with broken syntax.
pub fn parse_attributes(name: &str, input: &str, layout: &AttributeSpec) -> HlsResult<Attributes> {
    let mut attributes = Attributes::new();

    for item in split_outside_quotes(input, layout.separator) {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let (key, value) = item
            .split_once('=')
            .ok_or_else(|| errors::invalid_tag(name, "KEY=VALUE attribute", item))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(errors::invalid_tag(name, "attribute name", item));
        }
        let value = value.trim().trim_matches(layout.trim);
        if attributes.insert(key.to_string(), value.to_string()).is_some() {
            return Err(errors::invalid_tag(name, "unique attribute names", key));
        }
    }

    if attributes.is_empty() {
        return Err(errors::invalid_tag(name, "attribute list", input));
    }
    if attributes.len() < layout.min_count {
        return Err(errors::invalid_tag(
            name,
            format!("at least {} attributes", layout.min_count),
            input,
        ));
    }
    for key in layout.mandatory {
        if !attributes.contains_key(*key) {
            return Err(errors::invalid_tag(name, format!("attribute {}", key), input));
        }
    }

    Ok(attributes)
}

fn construct_key(text: &str) -> HlsResult<TagValue> {
    let attributes = parse_attributes(EXT_X_KEY, payload(EXT_X_KEY, text), &KEY_ATTRIBUTES)?;
    let method = KeyMethod::parse(&attributes["METHOD"]);
    let uri = attributes.get("URI").cloned();

    if method != KeyMethod::None && uri.as_deref().map_or(true, str::is_empty) {
        return Err(errors::invalid_tag(
            EXT_X_KEY,
            format!("URI attribute for METHOD={}", method),
            text,
        ));
    }

    let iv = attributes.get("IV").cloned();
    if let Some(iv) = &iv {
        let digits = iv
            .strip_prefix("0x")
            .or_else(|| iv.strip_prefix("0X"))
            .ok_or_else(|| errors::invalid_tag(EXT_X_KEY, "IV as 0x-prefixed hex", iv.as_str()))?;
        if digits.is_empty() || hex::decode(digits).is_err() {
            return Err(errors::invalid_tag(EXT_X_KEY, "IV as 0x-prefixed hex", iv.as_str()));
        }
    }

    Ok(TagValue::Key(KeySegment {
        method,
        uri,
        iv,
        attributes,
    }))
}

fn construct_inf(text: &str) -> HlsResult<TagValue> {
    let value = payload(EXTINF, text);
    let (duration, title) = match value.split_once(',') {
        Some((duration, title)) => (duration, title.trim()),
        None => (value, ""),
    };
    let duration = parse_float(EXTINF, duration)?;

    let mut bitrate = None;
    let mut uri = None;
    for line in text.lines().skip(1).map(str::trim) {
        if line.starts_with(EXT_X_BITRATE) {
            bitrate = Some(parse_integer(EXT_X_BITRATE, line)?);
        } else if !line.is_empty() && !line.starts_with('#') {
            uri = Some(line.to_string());
        }
    }
    let uri = uri.ok_or_else(|| errors::invalid_tag(EXTINF, "segment URI line", value))?;

    Ok(TagValue::Inf(InfBlock {
        duration,
        title: (!title.is_empty()).then(|| title.to_string()),
        bitrate,
        uri,
    }))
}

fn construct_stream_inf(text: &str) -> HlsResult<TagValue> {
    let value = payload(EXT_X_STREAM_INF, text);
    let attributes = parse_attributes(EXT_X_STREAM_INF, value, &STREAM_INF_ATTRIBUTES)?;

    let bandwidth = attributes["BANDWIDTH"]
        .parse::<u64>()
        .map_err(|_| errors::invalid_tag(EXT_X_STREAM_INF, "integer BANDWIDTH", &attributes["BANDWIDTH"]))?;
    let resolution = attributes
        .get("RESOLUTION")
        .map(String::as_str)
        .map(parse_resolution)
        .transpose()?;

    let uri = text
        .lines()
        .skip(1)
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#'))
        .ok_or_else(|| errors::invalid_tag(EXT_X_STREAM_INF, "variant URI line", value))?
        .to_string();

    Ok(TagValue::StreamInf(StreamVariant {
        bandwidth,
        resolution,
        audio_group: attributes.get("AUDIO").cloned(),
        codecs: attributes.get("CODECS").cloned(),
        uri,
        attributes,
    }))
}

fn parse_resolution(value: &str) -> HlsResult<Resolution> {
    let invalid = || errors::invalid_tag(EXT_X_STREAM_INF, "RESOLUTION as WIDTHxHEIGHT", value);
    let (width, height) = value.split_once(['x', 'X']).ok_or_else(invalid)?;
    Ok(Resolution {
        width: width.trim().parse().map_err(|_| invalid())?,
        height: height.trim().parse().map_err(|_| invalid())?,
    })
}

fn construct_media(text: &str) -> HlsResult<TagValue> {
    let attributes = parse_attributes(EXT_X_MEDIA, payload(EXT_X_MEDIA, text), &MEDIA_ATTRIBUTES)?;
    Ok(TagValue::Media(MediaGroup {
        media_type: attributes["TYPE"].clone(),
        group_id: attributes["GROUP-ID"].clone(),
        language: attributes.get("LANGUAGE").cloned(),
        name: attributes.get("NAME").cloned(),
        uri: attributes.get("URI").cloned(),
        attributes,
    }))
}
