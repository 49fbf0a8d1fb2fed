//! Per-task pipeline
//!
//! One runner executes one [`TaskRequest`] from playlist retrieval to the final
//! copy into the destination directory. It never touches the task table: every
//! state change is sent to the owning manager as a [`TaskUpdate`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::core::config::AppConfig;
use crate::core::error_handling::{errors, HlsError, HlsResult};
use crate::core::fetcher::FetchClient;
use crate::core::models::{TaskMethod, TaskRequest, TaskStatus};
use crate::core::muxer::{build_muxer, concat_list, ExternalMuxer, SEGMENT_LIST_FILE};
use crate::core::segment_downloader::{BatchProgress, SegmentDownloader};
use crate::core::storage::{FileStore, LocalFileStore};
use crate::parsers::m3u8_parser::{ParseOutcome, PlaylistParser};
use crate::parsers::playlist::{base_url_of, resolve_uri, MediaPlaylist, PlaylistKind};
use crate::parsers::rewrite::{
    key_uris, localize_segment_uris, normalize_iv, replace_key_uris, rewrite_first_key_line,
};
use crate::utils::encoding::decode_playlist_text;
use crate::utils::file_utils::{last_path_component, reserve_destination, sanitize_filename};
use crate::utils::process::{default_byte_source, default_process_runner};
use crate::utils::validation::{is_http_url, parse_key_hex, validate_url};

/// Verbatim copy of the source playlist inside the scratch directory
pub const PERSISTED_PLAYLIST: &str = "index.m3u8";
/// Playlist handed to the muxer, segment URIs pointing at local files
pub const LOCAL_PLAYLIST: &str = "local.m3u8";
/// Materialised override key, referenced relatively from the playlists
pub const OVERRIDE_KEY_FILE: &str = "override.key";
/// Subdirectory of the scratch directory holding downloaded segments
pub const SEGMENTS_DIR: &str = "segments";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    Download,
    Processing,
}

/// Messages from a runner to the task owner
#[derive(Debug, Clone)]
pub enum TaskUpdate {
    ScratchDir { task_id: String, path: PathBuf },
    Status { task_id: String, status: TaskStatus },
    Progress { task_id: String, progress: BatchProgress },
    PhaseFinished { task_id: String, phase: TaskPhase, elapsed: Duration },
    Completed { task_id: String, output_path: PathBuf },
    Failed { task_id: String, error: HlsError },
}

impl TaskUpdate {
    pub fn task_id(&self) -> &str {
        match self {
            Self::ScratchDir { task_id, .. }
            | Self::Status { task_id, .. }
            | Self::Progress { task_id, .. }
            | Self::PhaseFinished { task_id, .. }
            | Self::Completed { task_id, .. }
            | Self::Failed { task_id, .. } => task_id,
        }
    }
}

/// Collaborators shared by every runner
pub struct TaskServices {
    pub fetcher: Arc<FetchClient>,
    pub store: Arc<dyn FileStore>,
    pub muxer: Arc<dyn ExternalMuxer>,
    pub max_concurrent_segments: usize,
    pub scratch_root: PathBuf,
    pub output_extension: String,
}

impl TaskServices {
    /// Production wiring: reqwest, tokio::fs and the configured muxer
    pub fn from_config(config: &AppConfig) -> HlsResult<Self> {
        let download = &config.download;
        let source = default_byte_source(&download.user_agent)?;
        let fetcher = Arc::new(FetchClient::new(
            source,
            download.retry_policy(),
            download.headers.clone(),
            download.timeout(),
        ));
        let store: Arc<dyn FileStore> = Arc::new(LocalFileStore);
        let muxer = build_muxer(
            &config.processing,
            default_process_runner(),
            store.clone(),
            fetcher.clone(),
        );

        Ok(Self {
            fetcher,
            store,
            muxer,
            max_concurrent_segments: download.max_concurrent_segments,
            scratch_root: download.scratch_root(),
            output_extension: config.processing.output_extension.clone(),
        })
    }
}

pub struct TaskRunner {
    task_id: String,
    request: TaskRequest,
    services: Arc<TaskServices>,
    cancelled: Arc<AtomicBool>,
    updates: mpsc::UnboundedSender<TaskUpdate>,
}

impl TaskRunner {
    pub fn new(
        task_id: String,
        request: TaskRequest,
        services: Arc<TaskServices>,
        cancelled: Arc<AtomicBool>,
        updates: mpsc::UnboundedSender<TaskUpdate>,
    ) -> Self {
        Self {
            task_id,
            request,
            services,
            cancelled,
            updates,
        }
    }

    /// Execute the pipeline and report the outcome
    #[instrument(skip(self), fields(task_id = %self.task_id))]
    pub async fn run(self) {
        match self.execute().await {
            Ok(output_path) => {
                info!(output = %output_path.display(), "task completed");
                self.send(TaskUpdate::Completed {
                    task_id: self.task_id.clone(),
                    output_path,
                });
            }
            Err(error) => {
                error!(code = error.code(), error = %error, "task failed");
                self.send(TaskUpdate::Failed {
                    task_id: self.task_id.clone(),
                    error,
                });
            }
        }
    }

    fn send(&self, update: TaskUpdate) {
        if self.updates.send(update).is_err() {
            debug!(task_id = %self.task_id, "task owner gone, dropping update");
        }
    }

    fn set_status(&self, status: TaskStatus) {
        self.send(TaskUpdate::Status {
            task_id: self.task_id.clone(),
            status,
        });
    }

    fn ensure_active(&self, step: &str) -> HlsResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(errors::cancelled(step));
        }
        Ok(())
    }

    async fn execute(&self) -> HlsResult<PathBuf> {
        let store = &self.services.store;

        let scratch = self.services.scratch_root.join(&self.task_id);
        store.create_dir_all(&scratch).await?;
        self.send(TaskUpdate::ScratchDir {
            task_id: self.task_id.clone(),
            path: scratch.clone(),
        });

        let (text, base_url) = self.obtain_playlist(&scratch).await?;
        self.ensure_active("read playlist")?;

        let playlist = self.parse(&text, base_url.as_ref())?;
        let text = self.apply_overrides(&scratch, text).await?;

        let urls = playlist.segment_urls()?;
        if urls.is_empty() {
            return Err(errors::no_valid_segments(format!(
                "playlist {} lists no segments",
                self.request.source
            )));
        }
        self.ensure_active("resolve segments")?;

        let names = self.download_segments(&urls, &scratch).await?;
        self.ensure_active("download segments")?;

        let output = self.combine(&playlist, &text, &names, &scratch).await?;
        self.ensure_active("combine segments")?;

        let file_name = format!("{}.{}", self.output_stem(), self.services.output_extension);
        let destination =
            reserve_destination(store.as_ref(), &self.request.destination_dir, &file_name).await?;
        if let Err(error) = store.copy(&output, &destination).await {
            if let Err(cleanup) = store.remove_file(&destination).await {
                warn!(path = %destination.display(), error = %cleanup, "could not release destination");
            }
            return Err(error);
        }

        store.remove_dir_all(&scratch).await?;
        debug!(scratch = %scratch.display(), "scratch directory removed");
        Ok(destination)
    }

    /// Read or fetch the playlist and persist a verbatim copy
    async fn obtain_playlist(&self, scratch: &Path) -> HlsResult<(String, Option<Url>)> {
        let explicit_base = self
            .request
            .base_url
            .as_deref()
            .map(|base| Url::parse(base).map_err(|e| errors::invalid_url(base, e.to_string())))
            .transpose()?;

        let (raw, base_url) = match self.request.method {
            TaskMethod::Local => {
                let path = Path::new(&self.request.source);
                let raw = self.services.store.read_all(path).await?;
                (raw, explicit_base)
            }
            TaskMethod::Remote => {
                let url = validate_url(&self.request.source)?;
                let raw = self
                    .services
                    .fetcher
                    .fetch(&url, &self.request.headers)
                    .await?
                    .to_vec();
                let base = match explicit_base {
                    Some(base) => Some(base),
                    None => Some(base_url_of(&url)?),
                };
                (raw, base)
            }
        };

        let text = decode_playlist_text(&raw)?;
        if text.trim().is_empty() {
            return Err(errors::empty_content(self.request.source.as_str()));
        }

        self.services
            .store
            .write_atomic(&scratch.join(PERSISTED_PLAYLIST), &raw)
            .await?;
        info!(source = %self.request.source, bytes = raw.len(), "playlist obtained");
        Ok((text, base_url))
    }

    fn parse(&self, text: &str, base_url: Option<&Url>) -> HlsResult<MediaPlaylist> {
        let parser = PlaylistParser::with_cancel_flag(self.cancelled.clone());
        match parser.parse(text, PlaylistKind::detect(text), base_url)? {
            ParseOutcome::Media(playlist) => {
                info!(
                    segments = playlist.segments.len(),
                    duration = playlist.total_duration(),
                    encrypted = playlist.is_encrypted(),
                    "media playlist parsed"
                );
                Ok(playlist)
            }
            ParseOutcome::Master(_) => Err(errors::unsupported_master(self.request.source.as_str())),
            ParseOutcome::Cancelled => Err(errors::cancelled("parse playlist")),
        }
    }

    /// Materialise the override key and rewrite the first key line of the
    /// persisted copy. Returns the text the rest of the pipeline works from.
    async fn apply_overrides(&self, scratch: &Path, text: String) -> HlsResult<String> {
        if self.request.override_key.is_none() && self.request.override_iv.is_none() {
            return Ok(text);
        }

        let key_uri = match self.request.override_key.as_deref() {
            Some(key_hex) => {
                let key = parse_key_hex(key_hex)?;
                self.services
                    .store
                    .write_atomic(&scratch.join(OVERRIDE_KEY_FILE), &key)
                    .await?;
                Some(OVERRIDE_KEY_FILE)
            }
            None => None,
        };
        let iv = self
            .request
            .override_iv
            .as_deref()
            .map(normalize_iv)
            .transpose()?;

        match rewrite_first_key_line(&text, key_uri, iv.as_deref())? {
            Some(rewritten) => {
                self.services
                    .store
                    .write_atomic(&scratch.join(PERSISTED_PLAYLIST), rewritten.as_bytes())
                    .await?;
                info!("key override applied to persisted playlist");
                Ok(rewritten)
            }
            None => {
                warn!("override key or IV supplied but the playlist has no #EXT-X-KEY line");
                Ok(text)
            }
        }
    }

    /// Download every segment into the segments subdirectory, forwarding progress
    /// as it arrives. Returns the segment paths relative to `scratch`, in playlist
    /// order.
    async fn download_segments(&self, urls: &[Url], scratch: &Path) -> HlsResult<Vec<String>> {
        self.set_status(TaskStatus::Downloading { progress: 0.0 });

        let downloader = SegmentDownloader::new(
            self.services.fetcher.clone(),
            self.services.store.clone(),
            self.services.max_concurrent_segments,
        )
        .with_cancel_flag(self.cancelled.clone());

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let download = async {
            let progress_tx = progress_tx;
            downloader
                .download_all(
                    urls,
                    &scratch.join(SEGMENTS_DIR),
                    &self.request.headers,
                    Some(&progress_tx),
                )
                .await
        };
        let forward = async {
            while let Some(progress) = progress_rx.recv().await {
                self.set_status(TaskStatus::Downloading {
                    progress: progress.fraction(),
                });
                self.send(TaskUpdate::Progress {
                    task_id: self.task_id.clone(),
                    progress,
                });
            }
        };
        let (report, ()) = tokio::join!(download, forward);
        let report = report?;

        self.send(TaskUpdate::PhaseFinished {
            task_id: self.task_id.clone(),
            phase: TaskPhase::Download,
            elapsed: report.elapsed,
        });

        Ok(report
            .files
            .iter()
            .filter_map(|path| path.file_name())
            .map(|name| format!("{}/{}", SEGMENTS_DIR, name.to_string_lossy()))
            .collect())
    }

    async fn combine(
        &self,
        playlist: &MediaPlaylist,
        text: &str,
        names: &[String],
        scratch: &Path,
    ) -> HlsResult<PathBuf> {
        self.set_status(TaskStatus::Processing);
        let started = Instant::now();
        let store = &self.services.store;

        store
            .write_atomic(&scratch.join(SEGMENT_LIST_FILE), concat_list(names).as_bytes())
            .await?;
        let output = scratch.join(format!("output.{}", self.services.output_extension));

        if playlist.is_encrypted() {
            let text = self.materialise_keys(playlist, text, scratch).await?;
            let local = localize_segment_uris(&text, names);
            store
                .write_atomic(&scratch.join(LOCAL_PLAYLIST), local.as_bytes())
                .await?;
            self.services
                .muxer
                .decrypt_and_combine(scratch, LOCAL_PLAYLIST, &output)
                .await?;
        } else {
            self.services.muxer.combine(scratch, &output).await?;
        }

        self.send(TaskUpdate::PhaseFinished {
            task_id: self.task_id.clone(),
            phase: TaskPhase::Processing,
            elapsed: started.elapsed(),
        });
        Ok(output)
    }

    /// Fetch every remote key with the task's headers into `scratch` and point
    /// the key lines at the local copies, so the muxer never goes to the network.
    async fn materialise_keys(
        &self,
        playlist: &MediaPlaylist,
        text: &str,
        scratch: &Path,
    ) -> HlsResult<String> {
        let mut local_keys: HashMap<String, String> = HashMap::new();

        for uri in key_uris(text) {
            if uri == OVERRIDE_KEY_FILE || local_keys.contains_key(&uri) {
                continue;
            }
            let url = match resolve_uri(playlist.base_url.as_ref(), &uri) {
                Ok(url) if is_http_url(&url) => url,
                Ok(_) => continue,
                Err(HlsError::MissingParameter { .. }) => {
                    warn!(uri = %uri, "relative key URI without a base URL left as is");
                    continue;
                }
                Err(error) => return Err(error),
            };

            let name = format!("key_{}.bin", local_keys.len());
            let key = self
                .services
                .fetcher
                .fetch(&url, &self.request.headers)
                .await?;
            self.services
                .store
                .write_atomic(&scratch.join(&name), &key)
                .await?;
            debug!(%url, file = %name, "key stored locally");
            local_keys.insert(uri, name);
        }

        if local_keys.is_empty() {
            return Ok(text.to_string());
        }
        replace_key_uris(text, &local_keys)
    }

    /// Output file stem: the requested name, else the playlist's own name
    fn output_stem(&self) -> String {
        let requested = self
            .request
            .output_name
            .as_deref()
            .map(sanitize_filename)
            .filter(|name| !name.trim().is_empty());
        if let Some(name) = requested {
            return name;
        }

        let source_name = match self.request.method {
            TaskMethod::Remote => Url::parse(&self.request.source)
                .ok()
                .and_then(|url| last_path_component(&url)),
            TaskMethod::Local => Path::new(&self.request.source)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
        };
        source_name
            .and_then(|name| {
                Path::new(&name)
                    .file_stem()
                    .map(|stem| sanitize_filename(&stem.to_string_lossy()))
            })
            .filter(|stem| !stem.is_empty())
            .unwrap_or_else(|| self.task_id.clone())
    }
}
