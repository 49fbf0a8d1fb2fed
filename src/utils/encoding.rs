//! Playlist text decoding
//!
//! M3U8 is UTF-8 by definition; a leading byte order mark is tolerated and stripped.

use crate::core::error_handling::{errors, HlsResult};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Decode raw playlist bytes into text
pub fn decode_playlist_text(data: &[u8]) -> HlsResult<String> {
    let data = data.strip_prefix(UTF8_BOM).unwrap_or(data);
    String::from_utf8(data.to_vec()).map_err(|e| {
        errors::invalid_encoding(format!(
            "playlist is not valid UTF-8 (first invalid byte at offset {})",
            e.utf8_error().valid_up_to()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error_handling::HlsError;

    #[test]
    fn strips_byte_order_mark() {
        let text = decode_playlist_text(b"\xEF\xBB\xBF#EXTM3U\n").unwrap();
        assert_eq!(text, "#EXTM3U\n");
    }

    #[test]
    fn rejects_invalid_utf8() {
        let err = decode_playlist_text(b"#EXTM3U\n\xFF\xFE").unwrap_err();
        assert!(matches!(err, HlsError::InvalidEncoding { .. }));
    }
}
