//! Core download pipeline
//!
//! Errors, retry policies, fetching, storage, the segment downloader, muxers
//! and the task orchestration built on top of them.

pub mod config;
pub mod error_handling;
pub mod fetcher;
pub mod manager;
pub mod models;
pub mod muxer;
pub mod retry;
pub mod runtime;
pub mod segment_downloader;
pub mod storage;
pub mod task_runner;



// Re-export commonly used types
pub use config::AppConfig;
pub use error_handling::{HlsError, HlsResult};
pub use manager::TaskManager;
pub use runtime::{spawn_from_config, spawn_task_runtime, TaskRuntimeHandle};
