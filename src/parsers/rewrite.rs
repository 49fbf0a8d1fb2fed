//! Targeted edits of persisted playlist text

use std::collections::HashMap;

use crate::core::error_handling::{errors, HlsResult};
use crate::parsers::tags::{split_outside_quotes, EXTINF, EXT_X_KEY};

/// Replace the `URI` and/or `IV` of the first `#EXT-X-KEY` line.
///
/// Only that line changes; every other byte of `text`, line endings included,
/// is preserved. Attributes not being replaced (such as `METHOD`) keep their
/// original spelling and position. Returns `None` when the text has no key line.
pub fn rewrite_first_key_line(
    text: &str,
    key_uri: Option<&str>,
    iv: Option<&str>,
) -> HlsResult<Option<String>> {
    let mut offset = 0;
    for raw_line in text.split_inclusive('\n') {
        let content = raw_line.trim_end_matches(['\r', '\n']);
        let leading = content.len() - content.trim_start().len();
        let trimmed = content.trim();

        if is_key_line(trimmed) {
            let start = offset + leading;
            let end = start + trimmed.len();
            let replacement = rewrite_key_line(trimmed, key_uri, iv)?;

            let mut rewritten = String::with_capacity(text.len() + replacement.len());
            rewritten.push_str(&text[..start]);
            rewritten.push_str(&replacement);
            rewritten.push_str(&text[end..]);
            return Ok(Some(rewritten));
        }
        offset += raw_line.len();
    }
    Ok(None)
}

fn rewrite_key_line(line: &str, key_uri: Option<&str>, iv: Option<&str>) -> HlsResult<String> {
    let payload = &line[EXT_X_KEY.len() + 1..];
    if payload.trim().is_empty() {
        return Err(errors::invalid_tag(EXT_X_KEY, "attribute list", line));
    }

    let mut pieces: Vec<String> = Vec::new();
    let mut uri_written = false;
    let mut iv_written = false;

    for piece in split_outside_quotes(payload, ',') {
        let name = piece.split_once('=').map_or(piece, |(name, _)| name).trim();
        match (name, key_uri, iv) {
            ("URI", Some(uri), _) => {
                pieces.push(format!("URI=\"{}\"", uri));
                uri_written = true;
            }
            ("IV", _, Some(iv)) => {
                pieces.push(format!("IV={}", iv));
                iv_written = true;
            }
            _ => pieces.push(piece.to_string()),
        }
    }

    if let (Some(uri), false) = (key_uri, uri_written) {
        pieces.push(format!("URI=\"{}\"", uri));
    }
    if let (Some(iv), false) = (iv, iv_written) {
        pieces.push(format!("IV={}", iv));
    }

    Ok(format!("{}:{}", EXT_X_KEY, pieces.join(",")))
}

/// Whether `line` is an `#EXT-X-KEY` directive
fn is_key_line(line: &str) -> bool {
    line.starts_with(EXT_X_KEY) && line[EXT_X_KEY.len()..].starts_with(':')
}

/// Unquoted `URI` attribute of a key line
fn key_line_uri(line: &str) -> Option<String> {
    split_outside_quotes(&line[EXT_X_KEY.len() + 1..], ',')
        .into_iter()
        .filter_map(|piece| piece.split_once('='))
        .find(|(name, _)| name.trim() == "URI")
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
}

/// `URI` of every `#EXT-X-KEY` line, in playlist order
pub fn key_uris(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| is_key_line(line))
        .filter_map(key_line_uri)
        .collect()
}

/// Rewrite the `URI` of every key line whose current URI is a key of
/// `replacements`. All other bytes are copied unchanged.
pub fn replace_key_uris(text: &str, replacements: &HashMap<String, String>) -> HlsResult<String> {
    let mut output = String::with_capacity(text.len());

    for raw_line in text.split_inclusive('\n') {
        let content = raw_line.trim_end_matches(['\r', '\n']);
        let trimmed = content.trim();
        let replacement = is_key_line(trimmed)
            .then(|| key_line_uri(trimmed))
            .flatten()
            .and_then(|uri| replacements.get(&uri));

        match replacement {
            Some(uri) => {
                output.push_str(&rewrite_key_line(trimmed, Some(uri), None)?);
                output.push_str(&raw_line[content.len()..]);
            }
            None => output.push_str(raw_line),
        }
    }
    Ok(output)
}

/// Point every segment URI line at a local file name, in playlist order.
///
/// URI lines are the first non-blank, non-`#` lines after each `#EXTINF`. All
/// other lines are copied unchanged. Extra segments beyond `names` keep their URI.
pub fn localize_segment_uris(text: &str, names: &[String]) -> String {
    let mut output = String::with_capacity(text.len());
    let mut names = names.iter();
    let mut awaiting_uri = false;

    for raw_line in text.split_inclusive('\n') {
        let content = raw_line.trim_end_matches(['\r', '\n']);
        let trimmed = content.trim();

        if trimmed.starts_with(EXTINF) {
            awaiting_uri = true;
        } else if awaiting_uri && !trimmed.is_empty() && !trimmed.starts_with('#') {
            awaiting_uri = false;
            if let Some(name) = names.next() {
                output.push_str(name);
                output.push_str(&raw_line[content.len()..]);
                continue;
            }
        }
        output.push_str(raw_line);
    }
    output
}

/// Normalise a caller-supplied IV to the `0x`-prefixed form used in playlists
pub fn normalize_iv(iv: &str) -> HlsResult<String> {
    let digits = iv
        .trim()
        .strip_prefix("0x")
        .or_else(|| iv.trim().strip_prefix("0X"))
        .unwrap_or(iv.trim());
    let bytes = hex::decode(digits)
        .map_err(|e| errors::invalid_parameter("override_iv", e.to_string()))?;
    if bytes.len() != 16 {
        return Err(errors::invalid_parameter(
            "override_iv",
            format!("expected 16 bytes, got {}", bytes.len()),
        ));
    }
    Ok(format!("0x{}", digits.to_ascii_lowercase()))
}
