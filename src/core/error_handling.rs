//! Error taxonomy for playlist retrieval, parsing and task processing
//!
//! Every failure in the crate is expressed as an [`HlsError`]. Each variant belongs to
//! one [`ErrorCategory`], carries a stable machine-readable code and keeps the
//! structural context (URL, tag name, parameter, operation) that produced it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad error families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Connection, timeout, HTTP status and response failures
    Network,
    /// Playlist syntax, tag shape and encoding failures
    Parsing,
    /// Failures while turning a playlist into an output file
    Processing,
    /// Missing or invalid caller-supplied parameters
    Configuration,
    /// Unclassified operating system failures
    System,
}

/// Detailed error information with retry classification
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
pub enum HlsError {
    #[error("connection failed for {url}: {message}")]
    ConnectionFailed { url: String, message: String },

    #[error("request timed out for {url}")]
    Timeout { url: String },

    #[error("HTTP {status} returned by {url}")]
    HttpStatus { status: u16, url: String },

    #[error("invalid response from {url}: {message}")]
    InvalidResponse { url: String, message: String },

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("malformed playlist: {message}")]
    MalformedPlaylist { message: String },

    #[error("invalid tag {tag}: expected {expected}, received `{received}`")]
    InvalidTag {
        tag: String,
        expected: String,
        received: String,
    },

    #[error("invalid encoding: {message}")]
    InvalidEncoding { message: String },

    #[error("empty content from {source_name}")]
    EmptyContent { source_name: String },

    #[error("no valid segments: {message}")]
    NoValidSegments { message: String },

    #[error("master playlist at {url} is not supported for download, select a variant playlist")]
    UnsupportedMasterPlaylist { url: String },

    #[error("task not found: {task_id}")]
    TaskNotFound { task_id: String },

    #[error("operation cancelled: {operation}")]
    OperationCancelled { operation: String },

    #[error("maximum concurrent tasks reached ({limit})")]
    TaskLimitReached { limit: usize },

    #[error("external tool not found: {tool}")]
    ExternalToolNotFound { tool: String },

    #[error("external tool {tool} failed (exit code {exit_code:?}): {stderr}")]
    ExternalToolFailed {
        tool: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("missing parameter {parameter}")]
    MissingParameter { parameter: String },

    #[error("invalid parameter {parameter}: {reason}")]
    InvalidParameter { parameter: String, reason: String },

    #[error("{operation} failed: {message}")]
    System { operation: String, message: String },
}

impl HlsError {
    /// Stable code, suitable for logs and API consumers
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConnectionFailed { .. } => "NETWORK_CONNECTION",
            Self::Timeout { .. } => "NETWORK_TIMEOUT",
            Self::HttpStatus { status, .. } if *status >= 500 => "NETWORK_SERVER_ERROR",
            Self::HttpStatus { .. } => "NETWORK_CLIENT_ERROR",
            Self::InvalidResponse { .. } => "NETWORK_INVALID_RESPONSE",
            Self::InvalidUrl { .. } => "NETWORK_INVALID_URL",
            Self::MalformedPlaylist { .. } => "PARSING_MALFORMED_PLAYLIST",
            Self::InvalidTag { .. } => "PARSING_INVALID_TAG",
            Self::InvalidEncoding { .. } => "PARSING_INVALID_ENCODING",
            Self::EmptyContent { .. } => "PROCESSING_EMPTY_CONTENT",
            Self::NoValidSegments { .. } => "PROCESSING_NO_SEGMENTS",
            Self::UnsupportedMasterPlaylist { .. } => "PROCESSING_MASTER_UNSUPPORTED",
            Self::TaskNotFound { .. } => "PROCESSING_TASK_NOT_FOUND",
            Self::OperationCancelled { .. } => "PROCESSING_CANCELLED",
            Self::TaskLimitReached { .. } => "PROCESSING_TASK_LIMIT",
            Self::ExternalToolNotFound { .. } => "PROCESSING_TOOL_NOT_FOUND",
            Self::ExternalToolFailed { .. } => "PROCESSING_TOOL_FAILED",
            Self::MissingParameter { .. } => "CONFIG_MISSING_PARAMETER",
            Self::InvalidParameter { .. } => "CONFIG_INVALID_PARAMETER",
            Self::System { .. } => "SYSTEM",
        }
    }

    /// Get the error category for this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ConnectionFailed { .. }
            | Self::Timeout { .. }
            | Self::HttpStatus { .. }
            | Self::InvalidResponse { .. }
            | Self::InvalidUrl { .. } => ErrorCategory::Network,
            Self::MalformedPlaylist { .. }
            | Self::InvalidTag { .. }
            | Self::InvalidEncoding { .. } => ErrorCategory::Parsing,
            Self::EmptyContent { .. }
            | Self::NoValidSegments { .. }
            | Self::UnsupportedMasterPlaylist { .. }
            | Self::TaskNotFound { .. }
            | Self::OperationCancelled { .. }
            | Self::TaskLimitReached { .. }
            | Self::ExternalToolNotFound { .. }
            | Self::ExternalToolFailed { .. } => ErrorCategory::Processing,
            Self::MissingParameter { .. } | Self::InvalidParameter { .. } => {
                ErrorCategory::Configuration
            }
            Self::System { .. } => ErrorCategory::System,
        }
    }

    /// Transient failures: connection problems, timeouts and 5xx responses.
    /// Client errors and malformed URLs are never worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectionFailed { .. } | Self::Timeout { .. } => true,
            Self::HttpStatus { status, .. } => (500..600).contains(status),
            _ => false,
        }
    }

    /// Classify a reqwest failure for `url`
    pub fn from_reqwest(url: &str, error: &reqwest::Error) -> Self {
        if let Some(status) = error.status() {
            return errors::http_status(status.as_u16(), url);
        }
        if error.is_timeout() {
            errors::timeout(url)
        } else if error.is_builder() {
            errors::invalid_url(url, error.to_string())
        } else if error.is_body() || error.is_decode() {
            errors::invalid_response(url, error.to_string())
        } else {
            errors::connection_failed(url, error.to_string())
        }
    }
}

/// Result type alias for crate operations
pub type HlsResult<T> = Result<T, HlsError>;

/// Attach an operation name to unclassified I/O failures
pub trait OperationContext<T> {
    fn with_operation(self, operation: &str) -> HlsResult<T>;
}

impl<T> OperationContext<T> for std::io::Result<T> {
    fn with_operation(self, operation: &str) -> HlsResult<T> {
        self.map_err(|e| errors::system(operation, e.to_string()))
    }
}

/// Convenience functions for creating common error types
pub mod errors {
    use super::HlsError;

    pub fn connection_failed(url: impl Into<String>, message: impl Into<String>) -> HlsError {
        HlsError::ConnectionFailed {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn timeout(url: impl Into<String>) -> HlsError {
        HlsError::Timeout { url: url.into() }
    }

    pub fn http_status(status: u16, url: impl Into<String>) -> HlsError {
        HlsError::HttpStatus {
            status,
            url: url.into(),
        }
    }

    pub fn invalid_response(url: impl Into<String>, message: impl Into<String>) -> HlsError {
        HlsError::InvalidResponse {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> HlsError {
        HlsError::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn malformed_playlist(message: impl Into<String>) -> HlsError {
        HlsError::MalformedPlaylist {
            message: message.into(),
        }
    }

    pub fn invalid_tag(
        tag: impl Into<String>,
        expected: impl Into<String>,
        received: impl Into<String>,
    ) -> HlsError {
        HlsError::InvalidTag {
            tag: tag.into(),
            expected: expected.into(),
            received: received.into(),
        }
    }

    pub fn invalid_encoding(message: impl Into<String>) -> HlsError {
        HlsError::InvalidEncoding {
            message: message.into(),
        }
    }

    pub fn empty_content(source_name: impl Into<String>) -> HlsError {
        HlsError::EmptyContent {
            source_name: source_name.into(),
        }
    }

    pub fn no_valid_segments(message: impl Into<String>) -> HlsError {
        HlsError::NoValidSegments {
            message: message.into(),
        }
    }

    pub fn unsupported_master(url: impl Into<String>) -> HlsError {
        HlsError::UnsupportedMasterPlaylist { url: url.into() }
    }

    pub fn task_not_found(task_id: impl Into<String>) -> HlsError {
        HlsError::TaskNotFound {
            task_id: task_id.into(),
        }
    }

    pub fn cancelled(operation: impl Into<String>) -> HlsError {
        HlsError::OperationCancelled {
            operation: operation.into(),
        }
    }

    pub fn task_limit_reached(limit: usize) -> HlsError {
        HlsError::TaskLimitReached { limit }
    }

    pub fn tool_not_found(tool: impl Into<String>) -> HlsError {
        HlsError::ExternalToolNotFound { tool: tool.into() }
    }

    pub fn tool_failed(
        tool: impl Into<String>,
        exit_code: Option<i32>,
        stderr: impl Into<String>,
    ) -> HlsError {
        HlsError::ExternalToolFailed {
            tool: tool.into(),
            exit_code,
            stderr: stderr.into(),
        }
    }

    pub fn missing_parameter(parameter: impl Into<String>) -> HlsError {
        HlsError::MissingParameter {
            parameter: parameter.into(),
        }
    }

    pub fn invalid_parameter(parameter: impl Into<String>, reason: impl Into<String>) -> HlsError {
        HlsError::InvalidParameter {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    pub fn system(operation: impl Into<String>, message: impl Into<String>) -> HlsError {
        HlsError::System {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categorization() {
        let timeout = errors::timeout("https://example.com/a.ts");
        assert_eq!(timeout.category(), ErrorCategory::Network);
        assert_eq!(timeout.code(), "NETWORK_TIMEOUT");
        assert!(timeout.is_retryable());

        let tag = errors::invalid_tag("#EXT-X-VERSION", "integer", "three");
        assert_eq!(tag.category(), ErrorCategory::Parsing);
        assert!(!tag.is_retryable());
        assert!(tag.to_string().contains("#EXT-X-VERSION"));
        assert!(tag.to_string().contains("three"));

        let param = errors::missing_parameter("base_url");
        assert_eq!(param.category(), ErrorCategory::Configuration);
    }

    #[test]
    fn test_http_status_classification() {
        let not_found = errors::http_status(404, "https://example.com/a.ts");
        assert!(!not_found.is_retryable());
        assert_eq!(not_found.code(), "NETWORK_CLIENT_ERROR");

        let unavailable = errors::http_status(503, "https://example.com/a.ts");
        assert!(unavailable.is_retryable());
        assert_eq!(unavailable.code(), "NETWORK_SERVER_ERROR");
    }

    #[test]
    fn test_invalid_url_is_not_retryable() {
        assert!(!errors::invalid_url("::nope", "relative URL without a base").is_retryable());
    }

    #[test]
    fn test_io_error_keeps_operation_name() {
        let result: std::io::Result<()> = Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ));
        let err = result.with_operation("create_dir").unwrap_err();
        assert_eq!(err.category(), ErrorCategory::System);
        assert!(err.to_string().starts_with("create_dir failed"));
    }
}
