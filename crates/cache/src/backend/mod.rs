//! Storage backends for cache entries
//!
//! A backend stores opaque bytes under a [`CacheKey`]. It knows nothing about
//! entry encoding; [`CacheStore`](crate::CacheStore) layers that on top.
//! Every backend failure is reported as [`Error::StoreUnavailable`] so callers
//! have a single fallback policy.
//!
//! [`Error::StoreUnavailable`]: crate::Error::StoreUnavailable

mod http;
mod local;
mod memory;

pub use http::HttpBackend;
pub use local::LocalDirBackend;
pub use memory::MemoryBackend;

use crate::{CacheKey, Result};
use async_trait::async_trait;

/// Result of an atomic create-if-absent write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    /// The bytes were stored under a previously empty key
    Created,
    /// The key was already populated; holds the bytes that are stored there
    AlreadyPresent(Vec<u8>),
}

/// Byte storage addressed by cache key.
///
/// Implementations must be safe for concurrent use. `put` never overwrites:
/// when two writers race on one key exactly one of them sees
/// [`PutOutcome::Created`].
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short name used in logs and errors
    fn name(&self) -> &'static str;

    /// Fetch the bytes stored under `key`
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>>;

    /// Store `bytes` under `key` unless the key is already populated
    async fn put(&self, key: &CacheKey, bytes: Vec<u8>) -> Result<PutOutcome>;
}
