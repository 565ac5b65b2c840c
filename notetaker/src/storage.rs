use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Read access to the object store holding raw media.
///
/// The pipeline only ever fetches; uploads belong to the submission path.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch the object at `key` into `dest_dir`.
    /// Returns the local path and the object size in bytes.
    async fn fetch(&self, key: &str, dest_dir: &Path) -> Result<(PathBuf, u64)>;
}

/// Object store backed by a local directory.
///
/// Covers deployments where media never left the host: keys are paths
/// relative to the root. The object is copied into the working directory
/// so the pipeline's cleanup never touches the stored original.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn fetch(&self, key: &str, dest_dir: &Path) -> Result<(PathBuf, u64)> {
        if key.is_empty() {
            return Err(Error::NotFound("media object key is empty".into()));
        }

        let source = self.root.join(key);
        validate_path_in_dir(&source, &self.root)?;

        if !source.exists() {
            return Err(Error::NotFound(format!("media object not found: {key}")));
        }

        tokio::fs::create_dir_all(dest_dir).await?;
        let dest = dest_dir.join(object_file_name(key));
        let size = tokio::fs::copy(&source, &dest).await?;

        debug!(key, path = %dest.display(), size_bytes = size, "media copied from local store");

        Ok((dest, size))
    }
}

/// Object store reached over HTTP.
///
/// Keys are resolved against a base URL (a public bucket or a presigned
/// prefix) and streamed to disk, so a multi-gigabyte video never sits in
/// memory.
pub struct HttpObjectStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpObjectStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn fetch(&self, key: &str, dest_dir: &Path) -> Result<(PathBuf, u64)> {
        if key.is_empty() {
            return Err(Error::NotFound("media object key is empty".into()));
        }

        let url = format!("{}/{}", self.base_url, key);
        info!(%url, "downloading media");

        let response = self.client.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound(format!("media object not found: {key}")));
        }
        let response = response.error_for_status()?;

        tokio::fs::create_dir_all(dest_dir).await?;
        let dest = dest_dir.join(object_file_name(key));

        // Write to a temp file first, then rename (atomic-ish)
        let tmp_path = dest.with_extension("part");
        let streamed = async {
            let mut file = std::fs::File::create(&tmp_path)?;
            let mut stream = response.bytes_stream();
            let mut downloaded: u64 = 0;

            use std::io::Write;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                file.write_all(&chunk)?;
                downloaded += chunk.len() as u64;
            }

            file.flush()?;
            Ok::<u64, Error>(downloaded)
        }
        .await;

        // An interrupted download must not leave a partial file behind.
        let downloaded = match streamed {
            Ok(n) => n,
            Err(e) => {
                if tmp_path.exists() {
                    if let Err(remove_err) = std::fs::remove_file(&tmp_path) {
                        warn!(
                            path = %tmp_path.display(),
                            error = %remove_err,
                            "failed to remove partial download"
                        );
                    }
                }
                return Err(e);
            }
        };

        if let Err(e) = std::fs::rename(&tmp_path, &dest) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        debug!(key, path = %dest.display(), size_bytes = downloaded, "media downloaded");

        Ok((dest, downloaded))
    }
}

/// File name to use for a fetched object. Keys may contain slashes
/// (e.g. "videos/<owner>/<id>.mp4"); only the last component matters locally.
fn object_file_name(key: &str) -> String {
    Path::new(key)
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| "media.bin".to_string())
}

/// Normalize a path by resolving `.` and `..` components without touching the filesystem.
fn normalize_path(path: &Path) -> PathBuf {
    use std::path::Component;
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                parts.pop();
            }
            Component::CurDir => {}
            other => parts.push(other),
        }
    }
    parts.iter().collect()
}

/// Validate that a path is inside the expected directory (prevents path traversal).
fn validate_path_in_dir(path: &Path, expected_dir: &Path) -> Result<()> {
    let canonical_dir = expected_dir
        .canonicalize()
        .unwrap_or_else(|_| normalize_path(expected_dir));
    let canonical_path = path
        .canonicalize()
        .unwrap_or_else(|_| normalize_path(path));

    if canonical_path.starts_with(&canonical_dir) {
        Ok(())
    } else {
        Err(Error::NotFound(format!(
            "media object key escapes the store root: {}",
            path.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_file_name_strips_prefix() {
        assert_eq!(object_file_name("videos/user-1/abc.mp4"), "abc.mp4");
        assert_eq!(object_file_name("abc.mp4"), "abc.mp4");
    }

    #[test]
    fn test_validate_path_in_dir_valid() {
        let dir = std::env::temp_dir();
        let path = dir.join("clip.mp4");
        assert!(validate_path_in_dir(&path, &dir).is_ok());
    }

    #[test]
    fn test_validate_path_in_dir_traversal() {
        let dir = std::env::temp_dir().join("notetaker_store");
        let path = dir.join("..").join("..").join("etc").join("passwd");
        assert!(validate_path_in_dir(&path, &dir).is_err());
    }

    #[tokio::test]
    async fn test_fs_fetch_copies_into_dest() {
        let root = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("videos")).unwrap();
        std::fs::write(root.path().join("videos/clip.mp4"), b"not a real video").unwrap();

        let store = FsObjectStore::new(root.path());
        let (path, size) = store.fetch("videos/clip.mp4", work.path()).await.unwrap();

        assert_eq!(size, 16);
        assert!(path.starts_with(work.path()));
        assert_eq!(std::fs::read(&path).unwrap(), b"not a real video");
        // The original stays in place.
        assert!(root.path().join("videos/clip.mp4").exists());
    }

    #[tokio::test]
    async fn test_http_fetch_stream_error_leaves_no_partial_file() {
        use std::io::{Read, Write};
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf);
            // Advertise more bytes than are sent, then drop the connection.
            let _ = socket.write_all(
                b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\nConnection: close\r\n\r\npartial",
            );
        });

        let work = tempfile::tempdir().unwrap();
        let store = HttpObjectStore::new(format!("http://{addr}"));
        let err = store
            .fetch("videos/clip.mp4", work.path())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Http(_)));

        assert!(!work.path().join("clip.part").exists());
        assert_eq!(std::fs::read_dir(work.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_fs_fetch_missing_key_is_not_found() {
        let root = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();

        let store = FsObjectStore::new(root.path());
        let err = store.fetch("nope.mp4", work.path()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_fs_fetch_empty_key_is_not_found() {
        let root = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();

        let store = FsObjectStore::new(root.path());
        let err = store.fetch("", work.path()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
