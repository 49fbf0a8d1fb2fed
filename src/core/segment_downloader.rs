//! Bounded concurrent segment downloader
//!
//! Keeps at most `min(max_concurrent, urls.len())` fetches in flight and admits a
//! new one each time a fetch completes. The first segment that still fails after
//! the retry policy gives up aborts the whole batch. Each segment is written
//! atomically to `dest/<last path component>`.

use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

use crate::core::error_handling::{errors, HlsResult};
use crate::core::fetcher::{FetchClient, Headers};
use crate::core::storage::FileStore;
use crate::utils::file_utils::last_path_component;

/// Live progress of one batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
    pub bytes: u64,
    pub elapsed: Duration,
    /// Cumulative bytes over time since the batch started, in bytes per second
    pub throughput: f64,
}

impl BatchProgress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}

/// Outcome of a fully successful batch
#[derive(Debug, Clone)]
pub struct BatchReport {
    /// Written files, in playlist order
    pub files: Vec<PathBuf>,
    pub total_bytes: u64,
    pub elapsed: Duration,
}

pub struct SegmentDownloader {
    fetcher: Arc<FetchClient>,
    store: Arc<dyn FileStore>,
    max_concurrent: usize,
    cancelled: Option<Arc<AtomicBool>>,
}

impl SegmentDownloader {
    pub fn new(fetcher: Arc<FetchClient>, store: Arc<dyn FileStore>, max_concurrent: usize) -> Self {
        Self {
            fetcher,
            store,
            max_concurrent: max_concurrent.max(1),
            cancelled: None,
        }
    }

    /// Stop admitting new fetches once `flag` is set. Fetches already in flight
    /// are not interrupted.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancelled = Some(flag);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    pub async fn download_all(
        &self,
        urls: &[Url],
        dest: &Path,
        headers: &Headers,
        progress: Option<&mpsc::UnboundedSender<BatchProgress>>,
    ) -> HlsResult<BatchReport> {
        if urls.is_empty() {
            return Err(errors::no_valid_segments("segment list is empty"));
        }

        self.store.create_dir_all(dest).await?;
        let files: Vec<PathBuf> = segment_file_names(urls)
            .into_iter()
            .map(|name| dest.join(name))
            .collect();

        let total = urls.len();
        let limit = self.max_concurrent.min(total);
        info!(segments = total, concurrency = limit, dest = %dest.display(), "starting segment batch");

        let started = Instant::now();
        let mut queue = urls.iter().zip(files.iter()).enumerate();
        let mut in_flight = FuturesUnordered::new();
        for (index, (url, path)) in queue.by_ref().take(limit) {
            in_flight.push(self.fetch_segment(index, url, path, headers));
        }

        let mut completed = 0usize;
        let mut total_bytes = 0u64;

        while let Some(result) = in_flight.next().await {
            let (index, bytes) = match result {
                Ok(done) => done,
                Err(error) => {
                    warn!(error = %error, completed, total, "segment failed, aborting batch");
                    return Err(error);
                }
            };

            completed += 1;
            total_bytes += bytes;
            let elapsed = started.elapsed();
            let throughput = if elapsed.as_secs_f64() > 0.0 {
                total_bytes as f64 / elapsed.as_secs_f64()
            } else {
                0.0
            };
            debug!(index, completed, total, bytes = total_bytes, "segment stored");

            if let Some(tx) = progress {
                let _ = tx.send(BatchProgress {
                    completed,
                    total,
                    bytes: total_bytes,
                    elapsed,
                    throughput,
                });
            }

            if self.is_cancelled() {
                return Err(errors::cancelled("segment download"));
            }
            if let Some((index, (url, path))) = queue.next() {
                in_flight.push(self.fetch_segment(index, url, path, headers));
            }
        }

        // pending futures borrow `files`
        drop(in_flight);

        let elapsed = started.elapsed();
        info!(
            segments = total,
            bytes = total_bytes,
            elapsed_ms = elapsed.as_millis() as u64,
            "segment batch completed"
        );

        Ok(BatchReport {
            files,
            total_bytes,
            elapsed,
        })
    }

    async fn fetch_segment(
        &self,
        index: usize,
        url: &Url,
        path: &Path,
        headers: &Headers,
    ) -> HlsResult<(usize, u64)> {
        let data = self.fetcher.fetch(url, headers).await?;
        self.store.write_atomic(path, &data).await?;
        Ok((index, data.len() as u64))
    }
}

/// Local file name for every URL, in order.
///
/// The name is the URL's last path component, and URLs without a usable
/// component fall back to a zero-padded `segment_00004.ts`. A name already handed out to an
/// earlier segment gets a zero-padded index prefix (plus a counter if even that
/// is taken), so every URL in the batch maps to its own file.
pub fn segment_file_names(urls: &[Url]) -> Vec<String> {
    let mut taken: HashSet<String> = HashSet::with_capacity(urls.len());
    urls.iter()
        .enumerate()
        .map(|(index, url)| {
            let base = last_path_component(url)
                .unwrap_or_else(|| format!("segment_{:05}.ts", index));
            let mut candidate = base.clone();
            let mut attempt = 0usize;
            while taken.contains(&candidate) {
                candidate = match attempt {
                    0 => format!("{:05}_{}", index, base),
                    n => format!("{:05}_{}_{}", index, n, base),
                };
                attempt += 1;
            }
            taken.insert(candidate.clone());
            candidate
        })
        .collect()
}
