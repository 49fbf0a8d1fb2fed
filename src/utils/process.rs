//! Platform-facing capabilities: single-attempt byte fetches and subprocess execution
//!
//! The core only talks to these traits. Concrete implementations are chosen once at
//! startup through [`default_byte_source`] and [`default_process_runner`].

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;
use url::Url;

use crate::core::error_handling::{errors, HlsError, HlsResult};

/// One GET request, no retries
#[async_trait]
pub trait ByteStreamSource: Send + Sync {
    async fn fetch(&self, url: &Url, headers: &HeaderMap, timeout: Duration) -> HlsResult<Bytes>;
}

/// reqwest-backed source
#[derive(Clone, Default)]
pub struct HttpByteSource {
    client: Client,
}

impl HttpByteSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ByteStreamSource for HttpByteSource {
    async fn fetch(&self, url: &Url, headers: &HeaderMap, timeout: Duration) -> HlsResult<Bytes> {
        let response = self
            .client
            .get(url.clone())
            .headers(headers.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| HlsError::from_reqwest(url.as_str(), &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(errors::http_status(status.as_u16(), url.as_str()));
        }

        response
            .bytes()
            .await
            .map_err(|e| HlsError::from_reqwest(url.as_str(), &e))
    }
}

/// Captured result of a finished subprocess
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> HlsResult<ProcessOutput>;
}

/// tokio::process-backed runner
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, program: &str, args: &[String]) -> HlsResult<ProcessOutput> {
        debug!(program, ?args, "spawning process");
        let output = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => errors::tool_not_found(program),
                _ => errors::system(format!("spawn {}", program), e.to_string()),
            })?;

        Ok(ProcessOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

pub fn default_byte_source(user_agent: &str) -> HlsResult<Arc<dyn ByteStreamSource>> {
    let client = Client::builder()
        .user_agent(user_agent)
        .build()
        .map_err(|e| errors::system("build http client", e.to_string()))?;
    Ok(Arc::new(HttpByteSource::new(client)))
}

pub fn default_process_runner() -> Arc<dyn ProcessRunner> {
    Arc::new(TokioProcessRunner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_program_is_tool_not_found() {
        let runner = TokioProcessRunner;
        let err = runner
            .run("definitely-not-an-installed-tool-4821", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, HlsError::ExternalToolNotFound { .. }));
    }

    #[test]
    fn process_output_success_requires_zero_exit() {
        let output = ProcessOutput {
            exit_code: Some(1),
            stdout: String::new(),
            stderr: "boom".into(),
        };
        assert!(!output.success());
    }
}
