//! HLS Batch Downloader - Core Library
//!
//! Parses HLS playlists, downloads their segments with bounded concurrency and
//! hands them to a muxer, with one orchestrated task per playlist request.

pub mod core;
pub mod parsers;
pub mod utils;

// Re-export commonly used types
pub use core::{
    config::AppConfig,
    error_handling::{ErrorCategory, HlsError, HlsResult},
    manager::{EventSender, TaskManager},
    models::{DownloadConfig, TaskEvent, TaskInfo, TaskMethod, TaskRequest, TaskStatus},
    runtime::{spawn_from_config, spawn_task_runtime, TaskRuntimeHandle},
    segment_downloader::{BatchProgress, SegmentDownloader},
};
pub use parsers::{parse_playlist, MasterPlaylist, MediaPlaylist, ParseOutcome, PlaylistParser};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Initialize logging with the default filter
pub fn init() -> anyhow::Result<()> {
    utils::logging::init_tracing();
    tracing::info!("{} v{} initialized", NAME, VERSION);
    Ok(())
}

/// Initialize logging with the level from `config`, then start the task runtime.
/// Must be called from within a tokio runtime.
pub fn start(config: &AppConfig, events: Option<EventSender>) -> anyhow::Result<TaskRuntimeHandle> {
    utils::logging::init_tracing_with(&config.logging.filter_directive());
    let handle = spawn_from_config(config, events)?;
    tracing::info!("{} v{} started", NAME, VERSION);
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init() {
        assert!(init().is_ok());
    }

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
        assert_eq!(NAME, "hls-batch-downloader");
    }

    #[tokio::test]
    async fn test_start_with_default_config() {
        let handle = start(&AppConfig::default(), None).unwrap();
        assert!(handle.list().await.unwrap().is_empty());
    }
}
