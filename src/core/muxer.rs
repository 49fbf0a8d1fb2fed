//! Turning downloaded segments into one output file
//!
//! Both muxers read the ordered segment list `segments.txt` (ffmpeg concat
//! syntax) from the directory they are given; its entries are paths relative to
//! that directory. Decryption works from the local playlist copy, whose segment
//! and key URIs point at local files.

use aes::Aes128;
use async_trait::async_trait;
use cbc::Decryptor;
use cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

use crate::core::config::{MuxerKind, ProcessingConfig};
use crate::core::error_handling::{errors, HlsResult, OperationContext};
use crate::core::fetcher::{FetchClient, Headers};
use crate::core::storage::FileStore;
use crate::parsers::m3u8_parser::{parse_playlist, ParseOutcome};
use crate::parsers::playlist::{KeyMethod, KeySegment, MediaPlaylist, PlaylistKind};
use crate::utils::encoding::decode_playlist_text;
use crate::utils::process::ProcessRunner;

/// Name of the ordered segment list inside a segments directory
pub const SEGMENT_LIST_FILE: &str = "segments.txt";

#[async_trait]
pub trait ExternalMuxer: Send + Sync {
    /// Concatenate the segments listed in `segments_dir/segments.txt`
    async fn combine(&self, segments_dir: &Path, output_file: &Path) -> HlsResult<()>;

    /// Decrypt according to the local playlist and concatenate
    async fn decrypt_and_combine(
        &self,
        segments_dir: &Path,
        local_playlist_name: &str,
        output_file: &Path,
    ) -> HlsResult<()>;
}

/// Render an ffmpeg concat list for `names`, in order
pub fn concat_list(names: &[String]) -> String {
    let mut list = String::from("ffconcat version 1.0\n");
    for name in names {
        list.push_str("file '");
        list.push_str(&name.replace('\'', r"'\''"));
        list.push_str("'\n");
    }
    list
}

/// File names from an ffmpeg concat list
pub fn parse_concat_list(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| line.trim().strip_prefix("file "))
        .map(|entry| {
            let entry = entry.trim();
            let entry = entry
                .strip_prefix('\'')
                .and_then(|e| e.strip_suffix('\''))
                .unwrap_or(entry);
            entry.replace(r"'\''", "'")
        })
        .collect()
}

pub struct FfmpegMuxer {
    runner: Arc<dyn ProcessRunner>,
    ffmpeg_path: String,
}

impl FfmpegMuxer {
    pub fn new(runner: Arc<dyn ProcessRunner>, ffmpeg_path: impl Into<String>) -> Self {
        Self {
            runner,
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    async fn run(&self, args: Vec<String>) -> HlsResult<()> {
        let output = self.runner.run(&self.ffmpeg_path, &args).await?;
        if !output.success() {
            return Err(errors::tool_failed(
                self.ffmpeg_path.as_str(),
                output.exit_code,
                stderr_tail(&output.stderr),
            ));
        }
        Ok(())
    }
}

/// Last few lines of tool output, which is where ffmpeg reports the failure
fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().collect();
    let start = lines.len().saturating_sub(10);
    lines[start..].join("\n")
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[async_trait]
impl ExternalMuxer for FfmpegMuxer {
    async fn combine(&self, segments_dir: &Path, output_file: &Path) -> HlsResult<()> {
        info!(output = %output_file.display(), "combining segments with ffmpeg");
        let args = vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-f".to_string(),
            "concat".to_string(),
            "-safe".to_string(),
            "0".to_string(),
            "-i".to_string(),
            path_arg(&segments_dir.join(SEGMENT_LIST_FILE)),
            "-c".to_string(),
            "copy".to_string(),
            path_arg(output_file),
        ];
        self.run(args).await
    }

    async fn decrypt_and_combine(
        &self,
        segments_dir: &Path,
        local_playlist_name: &str,
        output_file: &Path,
    ) -> HlsResult<()> {
        info!(output = %output_file.display(), "decrypting and combining segments with ffmpeg");
        let args = vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-allowed_extensions".to_string(),
            "ALL".to_string(),
            "-protocol_whitelist".to_string(),
            "file,crypto,data,http,https,tcp,tls".to_string(),
            "-i".to_string(),
            path_arg(&segments_dir.join(local_playlist_name)),
            "-c".to_string(),
            "copy".to_string(),
            path_arg(output_file),
        ];
        self.run(args).await
    }
}

/// In-process muxer: byte concatenation plus AES-128-CBC decryption
pub struct NativeConcatMuxer {
    store: Arc<dyn FileStore>,
    key_fetcher: Option<Arc<FetchClient>>,
}

impl NativeConcatMuxer {
    pub fn new(store: Arc<dyn FileStore>) -> Self {
        Self {
            store,
            key_fetcher: None,
        }
    }

    /// Allow keys still referenced by http(s) URI to be fetched. These requests
    /// carry only the fetcher's default headers; task runners store remote keys
    /// locally, with the task's headers, before handing over a playlist.
    pub fn with_key_fetcher(mut self, fetcher: Arc<FetchClient>) -> Self {
        self.key_fetcher = Some(fetcher);
        self
    }

    async fn listed_segments(&self, segments_dir: &Path) -> HlsResult<Vec<PathBuf>> {
        let list = self
            .store
            .read_all(&segments_dir.join(SEGMENT_LIST_FILE))
            .await?;
        let names = parse_concat_list(&decode_playlist_text(&list)?);
        if names.is_empty() {
            return Err(errors::no_valid_segments(format!(
                "{} lists no segments",
                SEGMENT_LIST_FILE
            )));
        }
        Ok(names.into_iter().map(|name| segments_dir.join(name)).collect())
    }

    async fn load_key(&self, segments_dir: &Path, key: &KeySegment) -> HlsResult<[u8; 16]> {
        let uri = key
            .uri
            .as_deref()
            .ok_or_else(|| errors::missing_parameter("key uri"))?;

        let bytes = match Url::parse(uri) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {
                let fetcher = self.key_fetcher.as_ref().ok_or_else(|| {
                    errors::tool_failed(
                        "native-muxer",
                        None,
                        format!("key {} is remote and no key fetcher is configured", uri),
                    )
                })?;
                fetcher.fetch(&url, &Headers::new()).await?.to_vec()
            }
            Ok(url) if url.scheme() == "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|_| errors::invalid_url(uri, "not a local file path"))?;
                self.store.read_all(&path).await?
            }
            _ => self.store.read_all(&segments_dir.join(uri)).await?,
        };

        let len = bytes.len();
        bytes.try_into().map_err(|_| {
            errors::tool_failed(
                "native-muxer",
                None,
                format!("AES-128 key must be 16 bytes, got {}", len),
            )
        })
    }
}

/// IV from the key tag, else the media sequence number as a big-endian 128-bit value
pub fn derive_iv(key: &KeySegment, sequence: u64) -> [u8; 16] {
    key.iv_bytes().unwrap_or_else(|| {
        let mut iv = [0u8; 16];
        iv[8..].copy_from_slice(&sequence.to_be_bytes());
        iv
    })
}

pub fn decrypt_segment(data: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> HlsResult<Vec<u8>> {
    let decryptor = Decryptor::<Aes128>::new_from_slices(key, iv)
        .map_err(|e| errors::tool_failed("native-muxer", None, e.to_string()))?;
    decryptor
        .decrypt_padded_vec_mut::<Pkcs7>(data)
        .map_err(|_| errors::tool_failed("native-muxer", None, "AES-128 decryption failed"))
}

async fn write_output(output_file: &Path) -> HlsResult<File> {
    if let Some(parent) = output_file.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_operation("create output directory")?;
    }
    File::create(output_file)
        .await
        .with_operation("create output file")
}

#[async_trait]
impl ExternalMuxer for NativeConcatMuxer {
    async fn combine(&self, segments_dir: &Path, output_file: &Path) -> HlsResult<()> {
        let segments = self.listed_segments(segments_dir).await?;
        info!(segments = segments.len(), output = %output_file.display(), "concatenating segments");

        let mut output = write_output(output_file).await?;
        for segment in &segments {
            let data = self.store.read_all(segment).await?;
            output
                .write_all(&data)
                .await
                .with_operation("write output file")?;
        }
        output.flush().await.with_operation("flush output file")?;
        output.sync_all().await.with_operation("sync output file")?;
        Ok(())
    }

    async fn decrypt_and_combine(
        &self,
        segments_dir: &Path,
        local_playlist_name: &str,
        output_file: &Path,
    ) -> HlsResult<()> {
        let raw = self
            .store
            .read_all(&segments_dir.join(local_playlist_name))
            .await?;
        let text = decode_playlist_text(&raw)?;
        let playlist: MediaPlaylist = match parse_playlist(&text, PlaylistKind::Media, None)? {
            ParseOutcome::Media(playlist) => playlist,
            _ => return Err(errors::malformed_playlist("local playlist is not a media playlist")),
        };
        info!(
            segments = playlist.segments.len(),
            output = %output_file.display(),
            "decrypting and concatenating segments"
        );

        let mut keys: HashMap<usize, [u8; 16]> = HashMap::new();
        let mut output = write_output(output_file).await?;

        for segment in &playlist.segments {
            let data = self.store.read_all(&segments_dir.join(&segment.uri)).await?;
            let plain = match (segment.key_index, playlist.key_for(segment)) {
                (Some(index), Some(key)) if key.method == KeyMethod::Aes128 => {
                    let key_bytes = match keys.get(&index) {
                        Some(bytes) => *bytes,
                        None => {
                            let bytes = self.load_key(segments_dir, key).await?;
                            keys.insert(index, bytes);
                            bytes
                        }
                    };
                    let iv = derive_iv(key, segment.sequence);
                    debug!(uri = %segment.uri, sequence = segment.sequence, "decrypting segment");
                    decrypt_segment(&data, &key_bytes, &iv)?
                }
                (_, Some(key)) if key.is_encrypted() => {
                    return Err(errors::tool_failed(
                        "native-muxer",
                        None,
                        format!("unsupported encryption method {}", key.method),
                    ));
                }
                _ => data,
            };
            output
                .write_all(&plain)
                .await
                .with_operation("write output file")?;
        }
        output.flush().await.with_operation("flush output file")?;
        output.sync_all().await.with_operation("sync output file")?;
        Ok(())
    }
}

/// Muxer selected by configuration
pub fn build_muxer(
    config: &ProcessingConfig,
    runner: Arc<dyn ProcessRunner>,
    store: Arc<dyn FileStore>,
    key_fetcher: Arc<FetchClient>,
) -> Arc<dyn ExternalMuxer> {
    match config.muxer {
        MuxerKind::Ffmpeg => Arc::new(FfmpegMuxer::new(runner, config.ffmpeg_path.clone())),
        MuxerKind::Native => Arc::new(NativeConcatMuxer::new(store).with_key_fetcher(key_fetcher)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error_handling::HlsError;
    use crate::core::storage::LocalFileStore;
    use crate::utils::process::ProcessOutput;
    use aes::cipher::BlockEncryptMut;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    type Encryptor = cbc::Encryptor<Aes128>;

    fn encrypt(data: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> Vec<u8> {
        Encryptor::new_from_slices(key, iv)
            .unwrap()
            .encrypt_padded_vec_mut::<Pkcs7>(data)
    }

    #[derive(Default)]
    struct RecordingRunner {
        calls: Mutex<Vec<(String, Vec<String>)>>,
        exit_code: i32,
    }

    #[async_trait]
    impl ProcessRunner for RecordingRunner {
        async fn run(&self, program: &str, args: &[String]) -> HlsResult<ProcessOutput> {
            self.calls.lock().push((program.to_string(), args.to_vec()));
            Ok(ProcessOutput {
                exit_code: Some(self.exit_code),
                stdout: String::new(),
                stderr: "line1\nInvalid data found when processing input".to_string(),
            })
        }
    }

    #[test]
    fn concat_list_round_trips_quotes() {
        let names = vec!["a.ts".to_string(), "it's.ts".to_string()];
        let list = concat_list(&names);
        assert!(list.starts_with("ffconcat version 1.0\n"));
        assert_eq!(parse_concat_list(&list), names);
    }

    #[tokio::test]
    async fn ffmpeg_combine_uses_concat_demuxer() {
        let runner = Arc::new(RecordingRunner::default());
        let muxer = FfmpegMuxer::new(runner.clone(), "ffmpeg");

        muxer
            .combine(Path::new("/scratch/t1"), Path::new("/out/video.mp4"))
            .await
            .unwrap();

        let calls = runner.calls.lock();
        let (program, args) = &calls[0];
        assert_eq!(program, "ffmpeg");
        assert!(args.windows(2).any(|w| w[0] == "-f" && w[1] == "concat"));
        assert!(args.contains(&"/scratch/t1/segments.txt".to_string()));
        assert_eq!(args.last().unwrap(), "/out/video.mp4");
    }

    #[tokio::test]
    async fn ffmpeg_failure_carries_exit_code_and_stderr() {
        let runner = Arc::new(RecordingRunner {
            exit_code: 1,
            ..RecordingRunner::default()
        });
        let muxer = FfmpegMuxer::new(runner, "ffmpeg");

        let err = muxer
            .decrypt_and_combine(Path::new("/s"), "local.m3u8", Path::new("/o.mp4"))
            .await
            .unwrap_err();
        match err {
            HlsError::ExternalToolFailed {
                exit_code, stderr, ..
            } => {
                assert_eq!(exit_code, Some(1));
                assert!(stderr.contains("Invalid data"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn native_combine_preserves_list_order() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.ts"), b"BBB").unwrap();
        std::fs::write(dir.path().join("a.ts"), b"AAA").unwrap();
        std::fs::write(
            dir.path().join(SEGMENT_LIST_FILE),
            concat_list(&["b.ts".to_string(), "a.ts".to_string()]),
        )
        .unwrap();

        let output = dir.path().join("out").join("video.ts");
        NativeConcatMuxer::new(Arc::new(LocalFileStore))
            .combine(dir.path(), &output)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&output).unwrap(), b"BBBAAA");
    }

    #[tokio::test]
    async fn native_decrypts_with_local_key_and_sequence_iv() {
        let dir = TempDir::new().unwrap();
        let key = [7u8; 16];
        std::fs::write(dir.path().join("override.key"), key).unwrap();

        // first segment uses the sequence number as IV, second an explicit IV
        let seq_iv = derive_iv(
            &KeySegment {
                method: KeyMethod::Aes128,
                uri: None,
                iv: None,
                attributes: Default::default(),
            },
            5,
        );
        let explicit_iv = [0x11u8; 16];
        std::fs::write(dir.path().join("s0.ts"), encrypt(b"first-", &key, &seq_iv)).unwrap();
        std::fs::write(dir.path().join("s1.ts"), encrypt(b"second", &key, &explicit_iv)).unwrap();
        std::fs::write(dir.path().join("s2.ts"), b"-clear").unwrap();

        let playlist = format!(
            "#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXT-X-MEDIA-SEQUENCE:5\n\
#EXT-X-KEY:METHOD=AES-128,URI=\"override.key\"\n#EXTINF:4,\ns0.ts\n\
#EXT-X-KEY:METHOD=AES-128,URI=\"override.key\",IV=0x{}\n#EXTINF:4,\ns1.ts\n\
#EXT-X-KEY:METHOD=NONE\n#EXTINF:4,\ns2.ts\n#EXT-X-ENDLIST\n",
            hex::encode(explicit_iv)
        );
        std::fs::write(dir.path().join("local.m3u8"), playlist).unwrap();

        let output = dir.path().join("video.ts");
        NativeConcatMuxer::new(Arc::new(LocalFileStore))
            .decrypt_and_combine(dir.path(), "local.m3u8", &output)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&output).unwrap(), b"first-second-clear");
    }

    #[tokio::test]
    async fn native_rejects_remote_key_without_fetcher() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("s0.ts"), [0u8; 16]).unwrap();
        std::fs::write(
            dir.path().join("local.m3u8"),
            "#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXT-X-KEY:METHOD=AES-128,URI=\"https://x/key\"\n#EXTINF:4,\ns0.ts\n",
        )
        .unwrap();

        let err = NativeConcatMuxer::new(Arc::new(LocalFileStore))
            .decrypt_and_combine(dir.path(), "local.m3u8", &dir.path().join("o.ts"))
            .await
            .unwrap_err();
        assert!(matches!(err, HlsError::ExternalToolFailed { .. }));
    }
}
