//! Content-addressed task caching for kiln
//!
//! This crate provides the caching infrastructure for kiln task execution:
//! - Content fingerprints of task inputs
//! - Deterministic cache key computation
//! - Cache entries holding task outputs, and their materialization
//! - A cache store over local, in-memory and remote HTTP backends
//!
//! # Cache Key Computation
//!
//! Cache keys are computed from:
//! - The task's implementation name and version
//! - Input fingerprints, in declaration order
//! - Declared outputs, as a set
//!
//! Equal descriptors always yield equal keys, and a key always addresses the
//! same bytes: writing different content under an existing key is reported as
//! a collision instead of overwriting.

mod error;
mod fingerprint;
mod key;
mod store;

pub mod backend;
pub mod config;
pub mod entry;

// Re-export error types at crate root
pub use error::{Error, Result};

// Re-export main types
pub use backend::{CacheBackend, HttpBackend, LocalDirBackend, MemoryBackend, PutOutcome};
pub use config::{CacheConfig, RemoteCacheConfig};
pub use entry::{CACHE_ENTRY_TAG, CacheEntry, CacheEntryCodec, OutputFile};
pub use fingerprint::{DIGEST_LEN, Fingerprint, ImplementationIdentity, TaskDescriptor, TaskInput};
pub use key::{CacheKey, KEY_FORMAT_VERSION, compute_cache_key};
pub use store::CacheStore;
