//! Content-addressed cache store
//!
//! [`CacheStore`] turns a byte-level [`CacheBackend`] into a key → entry store
//! with the content-addressing contract enforced:
//!
//! - `get` has no side effects
//! - `put` of byte-identical content under an existing key is a no-op
//! - `put` of different content under an existing key is a [`KeyCollision`]
//!
//! [`KeyCollision`]: crate::Error::KeyCollision

use crate::backend::{CacheBackend, LocalDirBackend, MemoryBackend, PutOutcome};
use crate::{CacheEntry, CacheKey, Error, Fingerprint, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Key → entry store over a pluggable backend. Cloning is cheap.
#[derive(Clone)]
pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
}

impl CacheStore {
    /// Store over the given backend
    pub fn new(backend: impl CacheBackend + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    /// Store over a shared backend
    #[must_use]
    pub fn from_backend(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    /// Store over a local directory
    #[must_use]
    pub fn local(root: impl Into<PathBuf>) -> Self {
        Self::new(LocalDirBackend::new(root))
    }

    /// Store held in memory
    #[must_use]
    pub fn memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    /// Name of the backend in use
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Look up the entry stored under `key`.
    ///
    /// A stored entry that cannot be decoded is reported as
    /// [`Error::StoreUnavailable`], so callers treat it like any other backend
    /// failure and fall back to execution.
    pub async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let Some(bytes) = self.backend.get(key).await? else {
            debug!(%key, backend = self.backend_name(), "Cache entry not found");
            return Ok(None);
        };
        match CacheEntry::from_bytes(&bytes) {
            Ok(entry) => {
                debug!(%key, backend = self.backend_name(), files = entry.len(), "Cache entry found");
                Ok(Some(entry))
            }
            Err(e) => {
                warn!(%key, backend = self.backend_name(), error = %e, "Stored cache entry is unreadable");
                Err(Error::store_unavailable(
                    self.backend_name(),
                    format!("entry {key} is unreadable: {e}"),
                ))
            }
        }
    }

    /// Store `entry` under `key`.
    ///
    /// Idempotent for identical content. Fails with [`Error::KeyCollision`]
    /// if the key already holds different content; the stored entry is never
    /// overwritten.
    pub async fn put(&self, key: &CacheKey, entry: &CacheEntry) -> Result<()> {
        let bytes = entry.to_bytes()?;
        let digest = Fingerprint::of_bytes(&bytes);
        let size = bytes.len();
        match self.backend.put(key, bytes).await? {
            PutOutcome::Created => {
                debug!(%key, backend = self.backend_name(), size, "Stored cache entry");
                Ok(())
            }
            PutOutcome::AlreadyPresent(existing) if Fingerprint::of_bytes(&existing) == digest => {
                debug!(%key, backend = self.backend_name(), "Identical cache entry already stored");
                Ok(())
            }
            PutOutcome::AlreadyPresent(existing) if CacheEntry::from_bytes(&existing).is_err() => {
                Err(Error::store_unavailable(
                    self.backend_name(),
                    format!("entry {key} is occupied by unreadable bytes"),
                ))
            }
            PutOutcome::AlreadyPresent(_) => {
                error!(%key, backend = self.backend_name(), "Cache key collision: stored entry differs");
                Err(Error::KeyCollision {
                    key: key.to_string(),
                })
            }
        }
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("backend", &self.backend_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OutputFile;
    use async_trait::async_trait;
    use tempfile::TempDir;

    fn key() -> CacheKey {
        CacheKey::from_hex(&"42".repeat(32)).unwrap()
    }

    fn entry(contents: &str) -> CacheEntry {
        CacheEntry::new(vec![OutputFile {
            path: "out.bin".to_string(),
            contents: contents.as_bytes().to_vec(),
            executable: false,
        }])
        .unwrap()
    }

    struct RawBackend(Vec<u8>);

    #[async_trait]
    impl CacheBackend for RawBackend {
        fn name(&self) -> &'static str {
            "raw"
        }

        async fn get(&self, _key: &CacheKey) -> Result<Option<Vec<u8>>> {
            Ok(Some(self.0.clone()))
        }

        async fn put(&self, _key: &CacheKey, _bytes: Vec<u8>) -> Result<PutOutcome> {
            Ok(PutOutcome::AlreadyPresent(self.0.clone()))
        }
    }

    #[tokio::test]
    async fn test_get_on_empty_store() {
        let store = CacheStore::memory();
        assert!(store.get(&key()).await.unwrap().is_none());
        assert_eq!(store.backend_name(), "memory");
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let store = CacheStore::memory();
        store.put(&key(), &entry("v1")).await.unwrap();
        assert_eq!(store.get(&key()).await.unwrap(), Some(entry("v1")));
    }

    #[tokio::test]
    async fn test_identical_put_is_noop() {
        let store = CacheStore::memory();
        store.put(&key(), &entry("v1")).await.unwrap();
        store.put(&key(), &entry("v1")).await.unwrap();
        assert_eq!(store.get(&key()).await.unwrap(), Some(entry("v1")));
    }

    #[tokio::test]
    async fn test_different_put_is_collision() {
        let store = CacheStore::memory();
        store.put(&key(), &entry("v1")).await.unwrap();
        let err = store.put(&key(), &entry("v2")).await.unwrap_err();
        assert!(matches!(err, Error::KeyCollision { .. }));
        assert_eq!(store.get(&key()).await.unwrap(), Some(entry("v1")));
    }

    #[tokio::test]
    async fn test_local_store_contract() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::local(tmp.path());
        assert_eq!(store.backend_name(), "local");
        store.put(&key(), &entry("v1")).await.unwrap();
        store.put(&key(), &entry("v1")).await.unwrap();
        assert!(matches!(
            store.put(&key(), &entry("v2")).await,
            Err(Error::KeyCollision { .. })
        ));
    }

    #[tokio::test]
    async fn test_unreadable_entry_is_store_unavailable() {
        let store = CacheStore::new(RawBackend(b"garbage".to_vec()));
        let err = store.get(&key()).await.unwrap_err();
        assert!(err.is_store_unavailable());
    }

    #[tokio::test]
    async fn test_put_over_unreadable_entry_is_store_unavailable() {
        let store = CacheStore::new(RawBackend(b"garbage".to_vec()));
        let err = store.put(&key(), &entry("v1")).await.unwrap_err();
        assert!(err.is_store_unavailable());
    }

    #[tokio::test]
    async fn test_collision_against_stored_entry() {
        let stored = entry("theirs").to_bytes().unwrap();
        let store = CacheStore::new(RawBackend(stored));
        assert!(matches!(
            store.put(&key(), &entry("ours")).await,
            Err(Error::KeyCollision { .. })
        ));
        store.put(&key(), &entry("theirs")).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_identical_puts_succeed() {
        let store = CacheStore::memory();
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(
                async move { store.put(&key(), &entry("same")).await },
            ));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
    }
}
