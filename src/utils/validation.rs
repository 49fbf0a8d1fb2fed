//! URL and input validation utilities

use url::Url;

use crate::core::error_handling::{errors, HlsResult};

/// Parse an absolute http(s) URL
pub fn validate_url(url: &str) -> HlsResult<Url> {
    let parsed = Url::parse(url.trim()).map_err(|e| errors::invalid_url(url, e.to_string()))?;
    if !is_http_url(&parsed) {
        return Err(errors::invalid_url(url, "only http and https URLs are supported"));
    }
    Ok(parsed)
}

pub fn is_http_url(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}

/// Decode a hex AES-128 key, with or without a `0x` prefix
pub fn parse_key_hex(key: &str) -> HlsResult<[u8; 16]> {
    let trimmed = key.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let bytes =
        hex::decode(digits).map_err(|e| errors::invalid_parameter("override_key", e.to_string()))?;
    let len = bytes.len();
    bytes.try_into().map_err(|_| {
        errors::invalid_parameter("override_key", format!("expected 16 bytes, got {}", len))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error_handling::HlsError;

    #[test]
    fn rejects_non_http_schemes() {
        assert!(validate_url("https://example.com/a.m3u8").is_ok());
        assert!(matches!(
            validate_url("ftp://example.com/a.m3u8"),
            Err(HlsError::InvalidUrl { .. })
        ));
        assert!(validate_url("not a url").is_err());
    }

    #[test]
    fn key_must_be_sixteen_bytes() {
        let key = parse_key_hex("000102030405060708090a0b0c0d0e0f").unwrap();
        assert_eq!(key[15], 0x0f);
        assert!(matches!(
            parse_key_hex("0x0001"),
            Err(HlsError::InvalidParameter { .. })
        ));
        assert!(parse_key_hex("zz").is_err());
    }
}
