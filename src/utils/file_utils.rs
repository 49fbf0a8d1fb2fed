//! File system utilities

use std::path::{Path, PathBuf};
use url::Url;

use crate::core::error_handling::HlsResult;
use crate::core::storage::FileStore;

/// Last non-empty path segment of `url`, sanitised for use as a file name
pub fn last_path_component(url: &Url) -> Option<String> {
    url.path_segments()?
        .rev()
        .find(|segment| !segment.is_empty())
        .map(sanitize_filename)
        .filter(|name| !name.is_empty() && name != "." && name != "..")
}

/// Get file extension
pub fn get_file_extension(filename: &str) -> Option<&str> {
    Path::new(filename).extension().and_then(|ext| ext.to_str())
}

/// Sanitize filename for filesystem
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '|' | '?' | '*' => '_',
            '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// Claim `<dir>/<file_name>`, or the first free `<stem>_<n>.<ext>` if that is
/// taken. The returned path exists as an empty placeholder owned by the caller,
/// so concurrent callers can never be handed the same name.
pub async fn reserve_destination(
    store: &dyn FileStore,
    dir: &Path,
    file_name: &str,
) -> HlsResult<PathBuf> {
    store.create_dir_all(dir).await?;

    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string());
    let extension = get_file_extension(file_name);

    let mut counter = 0u32;
    loop {
        let name = match (counter, extension) {
            (0, _) => file_name.to_string(),
            (n, Some(ext)) => format!("{}_{}.{}", stem, n, ext),
            (n, None) => format!("{}_{}", stem, n),
        };
        let candidate = dir.join(name);
        if store.reserve(&candidate).await? {
            return Ok(candidate);
        }
        counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::LocalFileStore;
    use tempfile::TempDir;

    #[test]
    fn last_component_ignores_query_and_trailing_slash() {
        let url = Url::parse("https://cdn.example.com/a/b/seg-001.ts?token=x").unwrap();
        assert_eq!(last_path_component(&url).as_deref(), Some("seg-001.ts"));

        let url = Url::parse("https://cdn.example.com/a/b/").unwrap();
        assert_eq!(last_path_component(&url).as_deref(), Some("b"));

        let url = Url::parse("https://cdn.example.com/").unwrap();
        assert_eq!(last_path_component(&url), None);
    }

    #[test]
    fn sanitizes_reserved_characters() {
        assert_eq!(sanitize_filename("a:b*c?.ts"), "a_b_c_.ts");
    }

    #[tokio::test]
    async fn reserve_destination_appends_counter_before_extension() {
        let dir = TempDir::new().unwrap();
        let store = LocalFileStore;

        let first = reserve_destination(&store, dir.path(), "movie.mp4").await.unwrap();
        assert_eq!(first, dir.path().join("movie.mp4"));
        assert!(first.exists());

        let second = reserve_destination(&store, dir.path(), "movie.mp4").await.unwrap();
        assert_eq!(second, dir.path().join("movie_1.mp4"));

        let third = reserve_destination(&store, dir.path(), "movie.mp4").await.unwrap();
        assert_eq!(third, dir.path().join("movie_2.mp4"));
    }

    #[tokio::test]
    async fn concurrent_reservations_get_distinct_names() {
        let dir = TempDir::new().unwrap();
        let store = LocalFileStore;
        let out = dir.path().join("out");

        let (a, b, c) = tokio::join!(
            reserve_destination(&store, &out, "clip.mp4"),
            reserve_destination(&store, &out, "clip.mp4"),
            reserve_destination(&store, &out, "clip.mp4"),
        );
        let mut names = vec![a.unwrap(), b.unwrap(), c.unwrap()];
        names.sort();
        assert_eq!(
            names,
            vec![out.join("clip.mp4"), out.join("clip_1.mp4"), out.join("clip_2.mp4")]
        );
    }
}
