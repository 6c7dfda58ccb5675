//! Cache key derivation
//!
//! A [`CacheKey`] is the SHA-256 of a binary envelope describing a task:
//!
//! ```text
//! i32      key format version
//! string   implementation name
//! string   implementation version
//! u32      input count
//! (string name, 32 bytes fingerprint)*   in declaration order
//! u32      output count
//! string*  outputs, sorted and deduplicated
//! ```
//!
//! Inputs keep declaration order because a task may give positional meaning
//! to them. Outputs are a set; listing them differently never changes a key.

use crate::fingerprint::{DIGEST_LEN, TaskDescriptor, decode_digest_hex};
use crate::{Error, Result};
use kiln_serialize::Encoder;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;

/// Version of the key envelope. Bumping it invalidates every existing key.
pub const KEY_FORMAT_VERSION: i32 = 1;

/// Content-derived address of a cache entry
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey([u8; DIGEST_LEN]);

impl CacheKey {
    /// Parse a 64-character hex string.
    ///
    /// Keys are only ever derived with [`compute_cache_key`]; parsing is for
    /// decoding keys this crate wrote itself.
    pub(crate) fn from_hex(value: &str) -> Result<Self> {
        decode_digest_hex(value).map(Self)
    }

    /// Raw key bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Lowercase hex encoding
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", self.to_hex())
    }
}

impl Serialize for CacheKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for CacheKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Self::from_hex(&value).map_err(serde::de::Error::custom)
    }
}

/// Derive the cache key of a task.
///
/// Pure: equal descriptors always produce equal keys. A task without inputs
/// still gets a key from its implementation identity and outputs.
///
/// # Errors
///
/// Returns [`Error::InputUnavailable`] if any input has no fingerprint.
pub fn compute_cache_key(descriptor: &TaskDescriptor) -> Result<CacheKey> {
    let mut envelope = Vec::new();
    let mut enc = Encoder::new(&mut envelope);

    enc.write_i32(KEY_FORMAT_VERSION)?;
    enc.write_string(&descriptor.implementation.name)?;
    enc.write_string(&descriptor.implementation.version)?;

    enc.write_u32(count(descriptor.inputs.len())?)?;
    for input in &descriptor.inputs {
        let fingerprint = input.fingerprint.ok_or_else(|| {
            Error::input_unavailable(&input.name, None, "no fingerprint was computed")
        })?;
        enc.write_string(&input.name)?;
        enc.write_raw(fingerprint.as_bytes())?;
    }

    let outputs: BTreeSet<&str> = descriptor.outputs.iter().map(String::as_str).collect();
    enc.write_u32(count(outputs.len())?)?;
    for output in outputs {
        enc.write_string(output)?;
    }

    let mut key = [0u8; DIGEST_LEN];
    key.copy_from_slice(&Sha256::digest(&envelope));
    let key = CacheKey(key);
    tracing::trace!(
        implementation = %descriptor.implementation,
        inputs = descriptor.inputs.len(),
        %key,
        "Computed cache key"
    );
    Ok(key)
}

fn count(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| Error::serialization(format!("{len} items exceed key envelope limit")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Fingerprint, ImplementationIdentity, TaskInput};

    fn descriptor() -> TaskDescriptor {
        TaskDescriptor::new(ImplementationIdentity::new("compile", "1.0.0"))
            .with_input(TaskInput::new("src", Fingerprint::of_bytes(b"fn main() {}")))
            .with_input(TaskInput::new("cfg", Fingerprint::of_bytes(b"opt-level=3")))
            .with_output("out.bin")
    }

    #[test]
    fn test_key_is_deterministic() {
        assert_eq!(
            compute_cache_key(&descriptor()).unwrap(),
            compute_cache_key(&descriptor()).unwrap()
        );
    }

    #[test]
    fn test_input_change_changes_key() {
        let mut changed = descriptor();
        changed.inputs[0] = TaskInput::new("src", Fingerprint::of_bytes(b"fn main() { 1 }"));
        assert_ne!(
            compute_cache_key(&descriptor()).unwrap(),
            compute_cache_key(&changed).unwrap()
        );
    }

    #[test]
    fn test_input_order_is_significant() {
        let mut reordered = descriptor();
        reordered.inputs.reverse();
        assert_ne!(
            compute_cache_key(&descriptor()).unwrap(),
            compute_cache_key(&reordered).unwrap()
        );
    }

    #[test]
    fn test_output_order_and_duplicates_are_ignored() {
        let a = descriptor().with_output("b.log").with_output("a.log");
        let b = descriptor()
            .with_output("a.log")
            .with_output("b.log")
            .with_output("a.log");
        assert_eq!(compute_cache_key(&a).unwrap(), compute_cache_key(&b).unwrap());
    }

    #[test]
    fn test_implementation_version_changes_key() {
        let mut bumped = descriptor();
        bumped.implementation.version = "1.0.1".to_string();
        assert_ne!(
            compute_cache_key(&descriptor()).unwrap(),
            compute_cache_key(&bumped).unwrap()
        );
    }

    #[test]
    fn test_no_inputs_yields_stable_key() {
        let d = TaskDescriptor::new(ImplementationIdentity::new("generate", "2"));
        let key = compute_cache_key(&d).unwrap();
        assert_eq!(key, compute_cache_key(&d).unwrap());
        assert_eq!(key.to_hex().len(), 64);
    }

    #[test]
    fn test_unavailable_input_fails() {
        let d = descriptor().with_input(TaskInput::unavailable("generated.h"));
        match compute_cache_key(&d) {
            Err(Error::InputUnavailable { input, .. }) => assert_eq!(input, "generated.h"),
            other => panic!("expected InputUnavailable, got {other:?}"),
        }
    }

    #[test]
    fn test_key_hex_and_serde() {
        let key = compute_cache_key(&descriptor()).unwrap();
        assert_eq!(CacheKey::from_hex(&key.to_string()).unwrap(), key);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(serde_json::from_str::<CacheKey>(&json).unwrap(), key);
        assert!(CacheKey::from_hex("00").is_err());
    }
}
