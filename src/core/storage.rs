//! File storage capability used by the downloader and task runners

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use crate::core::error_handling::{HlsResult, OperationContext};

#[async_trait]
pub trait FileStore: Send + Sync {
    async fn create_dir_all(&self, path: &Path) -> HlsResult<()>;

    async fn remove_dir_all(&self, path: &Path) -> HlsResult<()>;

    /// Missing files are not an error
    async fn remove_file(&self, path: &Path) -> HlsResult<()>;

    /// Write `data` to `path` so that the final name never refers to a partial file
    async fn write_atomic(&self, path: &Path, data: &[u8]) -> HlsResult<()>;

    async fn read_all(&self, path: &Path) -> HlsResult<Vec<u8>>;

    /// Entries of `path`, sorted by file name
    async fn list_dir(&self, path: &Path) -> HlsResult<Vec<PathBuf>>;

    /// Copy `from` to `to` through a temporary sibling and a rename, returning
    /// the number of bytes copied. An existing `to` is replaced.
    async fn copy(&self, from: &Path, to: &Path) -> HlsResult<u64>;

    /// Create `path` as an empty file if nothing exists there yet. Returns
    /// `false` when the name is already taken.
    async fn reserve(&self, path: &Path) -> HlsResult<bool>;

    async fn exists(&self, path: &Path) -> bool;
}

/// Hidden temporary sibling of a target file, deleted on drop unless committed
struct PartFile {
    path: PathBuf,
    committed: bool,
}

impl PartFile {
    fn for_target(target: &Path) -> Self {
        let file_name = target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path: target.with_file_name(format!(".{}.{}.part", file_name, Uuid::new_v4())),
            committed: false,
        }
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != ErrorKind::NotFound {
                    debug!(path = %self.path.display(), error = %e, "could not remove temp file");
                }
            }
        }
    }
}

/// tokio::fs-backed store
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileStore;

#[async_trait]
impl FileStore for LocalFileStore {
    async fn create_dir_all(&self, path: &Path) -> HlsResult<()> {
        fs::create_dir_all(path).await.with_operation("create_dir_all")
    }

    async fn remove_dir_all(&self, path: &Path) -> HlsResult<()> {
        match fs::remove_dir_all(path).await {
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            other => other.with_operation("remove_dir_all"),
        }
    }

    async fn remove_file(&self, path: &Path) -> HlsResult<()> {
        match fs::remove_file(path).await {
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            other => other.with_operation("remove_file"),
        }
    }

    async fn write_atomic(&self, path: &Path, data: &[u8]) -> HlsResult<()> {
        let part = PartFile::for_target(path);

        let mut file = fs::File::create(&part.path)
            .await
            .with_operation("create temp file")?;
        file.write_all(data).await.with_operation("write temp file")?;
        file.flush().await.with_operation("flush temp file")?;
        file.sync_all().await.with_operation("sync temp file")?;
        drop(file);

        fs::rename(&part.path, path)
            .await
            .with_operation("rename temp file")?;
        part.commit();

        debug!(path = %path.display(), bytes = data.len(), "file written");
        Ok(())
    }

    async fn read_all(&self, path: &Path) -> HlsResult<Vec<u8>> {
        fs::read(path).await.with_operation("read file")
    }

    async fn list_dir(&self, path: &Path) -> HlsResult<Vec<PathBuf>> {
        let mut entries = fs::read_dir(path).await.with_operation("read_dir")?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await.with_operation("read_dir")? {
            paths.push(entry.path());
        }
        paths.sort();
        Ok(paths)
    }

    async fn copy(&self, from: &Path, to: &Path) -> HlsResult<u64> {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)
                .await
                .with_operation("create_dir_all")?;
        }

        let part = PartFile::for_target(to);
        let bytes = fs::copy(from, &part.path)
            .await
            .with_operation("copy file")?;
        fs::rename(&part.path, to)
            .await
            .with_operation("rename copied file")?;
        part.commit();

        debug!(from = %from.display(), to = %to.display(), bytes, "file copied");
        Ok(bytes)
    }

    async fn reserve(&self, path: &Path) -> HlsResult<bool> {
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err::<bool, _>(e).with_operation("reserve file"),
        }
    }

    async fn exists(&self, path: &Path) -> bool {
        fs::try_exists(path).await.unwrap_or(false)
    }
}
