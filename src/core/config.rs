//! Application configuration management

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::models::DownloadConfig;

/// Main application configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub download: DownloadConfig,
    pub processing: ProcessingConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MuxerKind {
    /// Run ffmpeg as an external process
    Ffmpeg,
    /// Concatenate (and decrypt) in process
    Native,
}

/// How downloaded segments become one output file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub muxer: MuxerKind,
    pub ffmpeg_path: String,
    /// Extension of the produced file, without the dot
    pub output_extension: String,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            muxer: MuxerKind::Ffmpeg,
            ffmpeg_path: "ffmpeg".to_string(),
            output_extension: "mp4".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String, // "error", "warn", "info", "debug", "trace"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    /// `EnvFilter` directive for this crate at the configured level
    pub fn filter_directive(&self) -> String {
        format!("hls_batch_downloader={}", self.level)
    }
}

const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

impl AppConfig {
    /// Load configuration from file, creating default if not exists
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::get_config_path()?)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

            let config: AppConfig =
                serde_json::from_str(&content).with_context(|| "Failed to parse config file")?;
            config
                .validate()
                .with_context(|| format!("Invalid configuration in {:?}", config_path))?;

            tracing::info!("Loaded configuration from: {:?}", config_path);
            Ok(config)
        } else {
            let config = Self::default();
            config.save_to(config_path)?;
            tracing::info!("Created default configuration at: {:?}", config_path);
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = self.export()?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        tracing::info!("Saved configuration to: {:?}", config_path);
        Ok(())
    }

    /// Get the path to the configuration file
    pub fn get_config_path() -> Result<PathBuf> {
        let project_dirs = ProjectDirs::from("com", "hlsbatch", "hls-batch-downloader")
            .with_context(|| "Failed to get project directories")?;

        Ok(project_dirs.config_dir().join("config.json"))
    }

    /// Export configuration as JSON string
    pub fn export(&self) -> Result<String> {
        serde_json::to_string_pretty(self).with_context(|| "Failed to export configuration")
    }

    /// Parse and validate configuration from a JSON string
    pub fn import(json: &str) -> Result<Self> {
        let config: AppConfig =
            serde_json::from_str(json).with_context(|| "Failed to parse imported configuration")?;

        config
            .validate()
            .with_context(|| "Imported configuration is invalid")?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let download = &self.download;

        if download.max_concurrent_tasks == 0 {
            anyhow::bail!("Concurrent tasks must be greater than 0");
        }
        if download.max_concurrent_tasks > 20 {
            anyhow::bail!("Concurrent tasks should not exceed 20");
        }
        if download.max_concurrent_segments == 0 {
            anyhow::bail!("Concurrent segment downloads must be greater than 0");
        }
        if download.max_concurrent_segments > 64 {
            anyhow::bail!("Concurrent segment downloads should not exceed 64");
        }
        if download.retry_attempts > 10 {
            anyhow::bail!("Retry attempts should not exceed 10");
        }
        if download.retry_base_delay_ms > download.retry_max_delay_ms {
            anyhow::bail!("Retry base delay must not exceed the maximum delay");
        }
        if download.timeout_seconds == 0 || download.timeout_seconds > 300 {
            anyhow::bail!("Timeout should be between 1 and 300 seconds");
        }

        if self.processing.output_extension.trim().is_empty() {
            anyhow::bail!("Output extension must not be empty");
        }
        if self.processing.output_extension.starts_with('.') {
            anyhow::bail!("Output extension must not start with a dot");
        }
        if self.processing.ffmpeg_path.trim().is_empty() {
            anyhow::bail!("ffmpeg path must not be empty");
        }

        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            anyhow::bail!(
                "Invalid log level: must be 'error', 'warn', 'info', 'debug', or 'trace'"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::retry::RetryKind;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_validation() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let mut config = AppConfig::default();
        config.download.retry_strategy = RetryKind::Linear;
        config.processing.muxer = MuxerKind::Native;

        let json = config.export().unwrap();
        assert!(json.contains("\"linear\""));
        assert!(json.contains("\"native\""));

        let parsed_config = AppConfig::import(&json).unwrap();
        assert_eq!(config.export().unwrap(), parsed_config.export().unwrap());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = AppConfig::import(r#"{"download": {"max_concurrent_tasks": 5}}"#).unwrap();
        assert_eq!(config.download.max_concurrent_tasks, 5);
        assert_eq!(config.download.max_concurrent_segments, 8);
        assert_eq!(config.processing.output_extension, "mp4");
    }

    #[test]
    fn test_invalid_config_validation() {
        let mut config = AppConfig::default();

        config.download.max_concurrent_tasks = 0;
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.download.max_concurrent_segments = 100;
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.download.timeout_seconds = 0;
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.processing.output_extension = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let created = AppConfig::load_from(&path).unwrap();
        assert!(path.exists());

        let mut changed = created.clone();
        changed.download.max_concurrent_segments = 4;
        changed.save_to(&path).unwrap();

        let reloaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(reloaded.download.max_concurrent_segments, 4);
    }
}
