//! Local directory backend

use super::{CacheBackend, PutOutcome};
use crate::{CacheKey, Error, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

const BACKEND_NAME: &str = "local";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Stores entries as files under a root directory.
///
/// Layout: `<root>/<hex[0..2]>/<hex[2..4]>/<hex>`. Entries are written to a
/// temporary file in the target directory and published with a hard link,
/// which fails if the target exists. Readers therefore never observe a
/// partially written entry and concurrent writers cannot overwrite each other.
#[derive(Debug, Clone)]
pub struct LocalDirBackend {
    root: PathBuf,
}

impl LocalDirBackend {
    /// Backend rooted at `root`. The directory is created on first write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path at which `key` is stored
    #[must_use]
    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        let hex = key.to_hex();
        self.root.join(&hex[0..2]).join(&hex[2..4]).join(hex)
    }

    fn unavailable(path: &Path, operation: &str, err: &std::io::Error) -> Error {
        Error::store_unavailable(
            BACKEND_NAME,
            format!("{operation} {} failed: {err}", path.display()),
        )
    }
}

#[async_trait]
impl CacheBackend for LocalDirBackend {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        let path = self.entry_path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::unavailable(&path, "read", &e)),
        }
    }

    async fn put(&self, key: &CacheKey, bytes: Vec<u8>) -> Result<PutOutcome> {
        let path = self.entry_path(key);
        let Some(dir) = path.parent() else {
            return Err(Error::configuration(format!(
                "entry path {} has no parent directory",
                path.display()
            )));
        };
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| Self::unavailable(dir, "create_dir_all", &e))?;

        let temp = dir.join(format!(
            ".{key}.{}.{}.tmp",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        tokio::fs::write(&temp, &bytes)
            .await
            .map_err(|e| Self::unavailable(&temp, "write", &e))?;

        let linked = tokio::fs::hard_link(&temp, &path).await;
        if let Err(e) = tokio::fs::remove_file(&temp).await {
            tracing::debug!(path = %temp.display(), error = %e, "Failed to remove temporary entry file");
        }

        match linked {
            Ok(()) => Ok(PutOutcome::Created),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let existing = tokio::fs::read(&path)
                    .await
                    .map_err(|e| Self::unavailable(&path, "read", &e))?;
                Ok(PutOutcome::AlreadyPresent(existing))
            }
            Err(e) => Err(Self::unavailable(&path, "link", &e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn key(byte: u8) -> CacheKey {
        CacheKey::from_hex(&hex::encode([byte; 32])).unwrap()
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let tmp = TempDir::new().unwrap();
        let backend = LocalDirBackend::new(tmp.path());
        assert_eq!(backend.get(&key(1)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let tmp = TempDir::new().unwrap();
        let backend = LocalDirBackend::new(tmp.path().join("entries"));
        let k = key(0xab);

        assert_eq!(
            backend.put(&k, b"payload".to_vec()).await.unwrap(),
            PutOutcome::Created
        );
        assert_eq!(backend.get(&k).await.unwrap(), Some(b"payload".to_vec()));

        let path = backend.entry_path(&k);
        assert!(path.starts_with(tmp.path().join("entries").join("ab").join("ab")));
        assert!(path.is_file());
    }

    #[tokio::test]
    async fn test_second_put_reports_existing_bytes() {
        let tmp = TempDir::new().unwrap();
        let backend = LocalDirBackend::new(tmp.path());
        let k = key(2);
        backend.put(&k, b"first".to_vec()).await.unwrap();
        assert_eq!(
            backend.put(&k, b"second".to_vec()).await.unwrap(),
            PutOutcome::AlreadyPresent(b"first".to_vec())
        );
        assert_eq!(backend.get(&k).await.unwrap(), Some(b"first".to_vec()));
    }

    #[tokio::test]
    async fn test_no_temporary_files_left_behind() {
        let tmp = TempDir::new().unwrap();
        let backend = LocalDirBackend::new(tmp.path());
        let k = key(3);
        backend.put(&k, b"x".to_vec()).await.unwrap();
        backend.put(&k, b"x".to_vec()).await.unwrap();
        let dir = backend.entry_path(&k).parent().unwrap().to_path_buf();
        let names: Vec<_> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_create_once() {
        let tmp = TempDir::new().unwrap();
        let backend = Arc::new(LocalDirBackend::new(tmp.path()));
        let k = key(4);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let backend = Arc::clone(&backend);
            handles.push(tokio::spawn(async move {
                backend.put(&k, b"same".to_vec()).await.unwrap()
            }));
        }
        let mut created = 0;
        for handle in handles {
            match handle.await.unwrap() {
                PutOutcome::Created => created += 1,
                PutOutcome::AlreadyPresent(bytes) => assert_eq!(bytes, b"same"),
            }
        }
        assert_eq!(created, 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unwritable_root_is_store_unavailable() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();
        let backend = LocalDirBackend::new(&blocker);
        let err = backend.put(&key(5), b"x".to_vec()).await.unwrap_err();
        assert!(err.is_store_unavailable());
    }
}
