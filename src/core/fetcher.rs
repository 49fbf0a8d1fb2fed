//! Network fetch client
//!
//! Wraps one logical GET: merges default headers with the caller's (caller wins),
//! applies the configured timeout and loops through the retry strategy on failure.

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

use crate::core::error_handling::{errors, HlsResult};
use crate::core::retry::RetryStrategy;
use crate::utils::encoding::decode_playlist_text;
use crate::utils::process::ByteStreamSource;

/// Header map as exchanged with callers and stored in configuration
pub type Headers = HashMap<String, String>;

pub struct FetchClient {
    source: Arc<dyn ByteStreamSource>,
    retry: Arc<dyn RetryStrategy>,
    default_headers: Headers,
    timeout: Duration,
}

impl FetchClient {
    pub fn new(
        source: Arc<dyn ByteStreamSource>,
        retry: Arc<dyn RetryStrategy>,
        default_headers: Headers,
        timeout: Duration,
    ) -> Self {
        Self {
            source,
            retry,
            default_headers,
            timeout,
        }
    }

    /// Fetch `url`, retrying transient failures. When attempts are exhausted the
    /// last concrete error is returned.
    pub async fn fetch(&self, url: &Url, headers: &Headers) -> HlsResult<Bytes> {
        let merged = merge_headers(&self.default_headers, headers)?;
        let mut attempt = 0u32;

        loop {
            match self.source.fetch(url, &merged, self.timeout).await {
                Ok(bytes) => {
                    debug!(%url, attempt, bytes = bytes.len(), "fetch completed");
                    return Ok(bytes);
                }
                Err(error) => {
                    if !self.retry.should_retry(&error, attempt) {
                        return Err(error);
                    }
                    let delay = self.retry.delay(attempt);
                    warn!(
                        %url,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying after transient error"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Fetch and decode a playlist body
    pub async fn fetch_text(&self, url: &Url, headers: &Headers) -> HlsResult<String> {
        let bytes = self.fetch(url, headers).await?;
        decode_playlist_text(&bytes)
    }
}

/// Caller headers override defaults; names compare case-insensitively
pub fn merge_headers(defaults: &Headers, overrides: &Headers) -> HlsResult<HeaderMap> {
    let mut merged = HeaderMap::new();
    for (name, value) in defaults.iter().chain(overrides.iter()) {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| errors::invalid_parameter(format!("header {}", name), e.to_string()))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|e| errors::invalid_parameter(format!("header {}", name), e.to_string()))?;
        merged.insert(header_name, header_value);
    }
    Ok(merged)
}
