//! In-process backend

use super::{CacheBackend, PutOutcome};
use crate::{CacheKey, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Keeps entries in a concurrent map for the lifetime of the process
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: DashMap<CacheKey, Vec<u8>>,
}

impl MemoryBackend {
    /// Empty backend
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `key` is populated
    #[must_use]
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).map(|bytes| bytes.value().clone()))
    }

    async fn put(&self, key: &CacheKey, bytes: Vec<u8>) -> Result<PutOutcome> {
        match self.entries.entry(*key) {
            Entry::Occupied(existing) => Ok(PutOutcome::AlreadyPresent(existing.get().clone())),
            Entry::Vacant(slot) => {
                slot.insert(bytes);
                Ok(PutOutcome::Created)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_if_absent() {
        let backend = MemoryBackend::new();
        let key = CacheKey::from_hex(&"11".repeat(32)).unwrap();
        assert!(backend.is_empty());
        assert_eq!(backend.get(&key).await.unwrap(), None);

        assert_eq!(
            backend.put(&key, vec![1, 2]).await.unwrap(),
            PutOutcome::Created
        );
        assert_eq!(
            backend.put(&key, vec![3]).await.unwrap(),
            PutOutcome::AlreadyPresent(vec![1, 2])
        );
        assert_eq!(backend.get(&key).await.unwrap(), Some(vec![1, 2]));
        assert!(backend.contains(&key));
        assert_eq!(backend.len(), 1);
    }
}
