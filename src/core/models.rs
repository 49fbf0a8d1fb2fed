//! Core data models for download tasks

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::core::error_handling::HlsError;
use crate::core::retry::{build_strategy, RetryKind, RetryStrategy};
use crate::core::segment_downloader::BatchProgress;

/// Where the playlist text comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskMethod {
    /// `source` is a URL fetched over HTTP(S)
    Remote,
    /// `source` is a path on the local file system
    Local,
}

/// A request to download one media playlist into one output file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub source: String,
    /// Base for relative segment URIs. Defaults to the directory of a remote source.
    pub base_url: Option<String>,
    pub destination_dir: PathBuf,
    /// Output file stem; derived from the playlist name when absent
    pub output_name: Option<String>,
    pub method: TaskMethod,
    /// Hex-encoded AES-128 key replacing the playlist's key URI
    pub override_key: Option<String>,
    pub override_iv: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl TaskRequest {
    pub fn remote(url: impl Into<String>, destination_dir: impl Into<PathBuf>) -> Self {
        Self::new(url.into(), destination_dir.into(), TaskMethod::Remote)
    }

    pub fn local(path: impl Into<String>, destination_dir: impl Into<PathBuf>) -> Self {
        Self::new(path.into(), destination_dir.into(), TaskMethod::Local)
    }

    fn new(source: String, destination_dir: PathBuf, method: TaskMethod) -> Self {
        Self {
            source,
            base_url: None,
            destination_dir,
            output_name: None,
            method,
            override_key: None,
            override_iv: None,
            headers: HashMap::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_output_name(mut self, name: impl Into<String>) -> Self {
        self.output_name = Some(name.into());
        self
    }

    pub fn with_override_key(mut self, key_hex: impl Into<String>) -> Self {
        self.override_key = Some(key_hex.into());
        self
    }

    pub fn with_override_iv(mut self, iv_hex: impl Into<String>) -> Self {
        self.override_iv = Some(iv_hex.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Task status enumeration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    /// Fraction of segments stored, 0.0 to 1.0
    Downloading { progress: f64 },
    Processing,
    Completed,
    Failed { error: HlsError },
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. } | Self::Cancelled)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading { .. } => "downloading",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed { .. } => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Per-task measurements. Phase durations are recorded once.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskMetrics {
    pub download_duration: Option<Duration>,
    pub processing_duration: Option<Duration>,
    pub segment_count: usize,
    pub completed_segments: usize,
    pub total_bytes: u64,
    /// Bytes per second since the batch started
    pub throughput: f64,
}

impl TaskMetrics {
    pub fn record_progress(&mut self, progress: &BatchProgress) {
        self.segment_count = progress.total;
        self.completed_segments = progress.completed;
        self.total_bytes = progress.bytes;
        self.throughput = progress.throughput;
    }

    pub fn record_download(&mut self, elapsed: Duration) {
        self.download_duration.get_or_insert(elapsed);
    }

    pub fn record_processing(&mut self, elapsed: Duration) {
        self.processing_duration.get_or_insert(elapsed);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: String,
    pub source: String,
    pub base_url: Option<String>,
    pub destination_dir: PathBuf,
    pub output_name: Option<String>,
    pub method: TaskMethod,
    #[serde(skip_serializing)]
    pub override_key: Option<String>,
    pub override_iv: Option<String>,
    pub status: TaskStatus,
    pub start_time: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metrics: TaskMetrics,
    pub output_path: Option<PathBuf>,
    /// Scratch directory; kept after a failure for inspection
    pub scratch_dir: Option<PathBuf>,
}

impl TaskInfo {
    pub fn new(id: impl Into<String>, request: &TaskRequest) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            source: request.source.clone(),
            base_url: request.base_url.clone(),
            destination_dir: request.destination_dir.clone(),
            output_name: request.output_name.clone(),
            method: request.method,
            override_key: request.override_key.clone(),
            override_iv: request.override_iv.clone(),
            status: TaskStatus::Pending,
            start_time: now,
            updated_at: now,
            metrics: TaskMetrics::default(),
            output_path: None,
            scratch_dir: None,
        }
    }

    pub fn error(&self) -> Option<&HlsError> {
        match &self.status {
            TaskStatus::Failed { error } => Some(error),
            _ => None,
        }
    }
}

/// Notifications published to an optional observer
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    Created { task_id: String },
    StatusChanged { task_id: String, status: TaskStatus },
    Progress { task_id: String, progress: BatchProgress },
    Completed { task_id: String, output_path: PathBuf },
    Failed { task_id: String, error: HlsError },
    Cancelled { task_id: String },
}

/// Download configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Tasks allowed to run at once; further submissions are rejected
    pub max_concurrent_tasks: usize,
    /// Segment fetches in flight per task
    pub max_concurrent_segments: usize,
    pub retry_strategy: RetryKind,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub timeout_seconds: u64,
    pub user_agent: String,
    pub headers: HashMap<String, String>,
    /// Root for per-task scratch directories; the system temp dir when unset
    pub temp_dir: Option<PathBuf>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 3,
            max_concurrent_segments: 8,
            retry_strategy: RetryKind::Exponential,
            retry_attempts: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 30_000,
            timeout_seconds: 30,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string(),
            headers: HashMap::new(),
            temp_dir: None,
        }
    }
}

impl DownloadConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn scratch_root(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("hls_batch_downloader"))
    }

    pub fn retry_policy(&self) -> Arc<dyn RetryStrategy> {
        build_strategy(
            self.retry_strategy,
            self.retry_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error_handling::errors;

    #[test]
    fn terminal_states() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Downloading { progress: 0.5 }.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(TaskStatus::Failed {
            error: errors::timeout("u")
        }
        .is_terminal());
    }

    #[test]
    fn phase_durations_are_write_once() {
        let mut metrics = TaskMetrics::default();
        metrics.record_download(Duration::from_secs(2));
        metrics.record_download(Duration::from_secs(9));
        assert_eq!(metrics.download_duration, Some(Duration::from_secs(2)));
    }

    #[test]
    fn override_key_is_not_serialized() {
        let request = TaskRequest::remote("https://example.com/a.m3u8", "/tmp/out")
            .with_override_key("000102030405060708090a0b0c0d0e0f");
        let info = TaskInfo::new("t1", &request);
        let json = serde_json::to_string(&info).unwrap();
        assert!(!json.contains("000102030405060708090a0b0c0d0e0f"));
        assert!(json.contains("\"state\":\"pending\""));
    }

    #[test]
    fn status_serializes_with_error_context() {
        let status = TaskStatus::Failed {
            error: errors::http_status(404, "https://example.com/a.ts"),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "failed");
        assert!(json["error"]["HttpStatus"]["url"]
            .as_str()
            .unwrap()
            .contains("a.ts"));
    }
}
