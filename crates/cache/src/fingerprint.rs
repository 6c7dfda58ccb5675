//! Content fingerprints and task descriptors
//!
//! A [`Fingerprint`] is the SHA-256 of some content. Tasks describe themselves
//! to the cache with a [`TaskDescriptor`]: an implementation identity, the
//! fingerprints of their inputs in declaration order, and the outputs they
//! produce.

use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::Path;
use walkdir::WalkDir;

/// Length in bytes of a SHA-256 digest
pub const DIGEST_LEN: usize = 32;

/// SHA-256 of a piece of content
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; DIGEST_LEN]);

impl Fingerprint {
    /// Wrap raw digest bytes
    #[must_use]
    pub const fn from_digest(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    /// Fingerprint of an in-memory byte slice
    #[must_use]
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(finalize(Sha256::new_with_prefix(bytes)))
    }

    /// Fingerprint of a file's contents, streamed in 64 KiB blocks
    pub fn of_file(path: &Path) -> Result<Self> {
        let _span = tracing::trace_span!("fingerprint_file", path = %path.display()).entered();
        let mut file = fs::File::open(path).map_err(|e| Error::io(e, path, "open"))?;
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 1024 * 64];
        let mut total: u64 = 0;
        loop {
            let n = file.read(&mut buf).map_err(|e| Error::io(e, path, "read"))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            total += n as u64;
        }
        tracing::trace!(path = %path.display(), size = total, "Fingerprinted file");
        Ok(Self(finalize(hasher)))
    }

    /// Fingerprint of a directory tree.
    ///
    /// Covers every regular file below `path`, visited in sorted order, as
    /// (relative path, content fingerprint) pairs. An empty directory has a
    /// valid fingerprint.
    pub fn of_directory(path: &Path) -> Result<Self> {
        let mut hasher = Sha256::new();
        let mut files = 0usize;
        for entry in WalkDir::new(path).sort_by_file_name() {
            let entry =
                entry.map_err(|e| Error::io(std::io::Error::from(e), path, "walk directory"))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry.path().strip_prefix(path).map_err(|_| {
                Error::configuration(format!(
                    "path {} is not under {}",
                    entry.path().display(),
                    path.display()
                ))
            })?;
            let rel = portable_path(rel);
            hasher.update((rel.len() as u64).to_be_bytes());
            hasher.update(rel.as_bytes());
            hasher.update(Self::of_file(entry.path())?.0);
            files += 1;
        }
        tracing::trace!(path = %path.display(), files, "Fingerprinted directory");
        Ok(Self(finalize(hasher)))
    }

    /// Parse a 64-character hex string
    pub fn from_hex(value: &str) -> Result<Self> {
        decode_digest_hex(value).map(Self)
    }

    /// Raw digest bytes
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

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Self::from_hex(&value).map_err(serde::de::Error::custom)
    }
}

pub(crate) fn finalize(hasher: Sha256) -> [u8; DIGEST_LEN] {
    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(&hasher.finalize());
    out
}

pub(crate) fn decode_digest_hex(value: &str) -> Result<[u8; DIGEST_LEN]> {
    let invalid = |reason: String| Error::InvalidKey {
        value: value.to_string(),
        reason,
    };
    let bytes = hex::decode(value).map_err(|e| invalid(e.to_string()))?;
    <[u8; DIGEST_LEN]>::try_from(bytes.as_slice())
        .map_err(|_| invalid(format!("expected {DIGEST_LEN} bytes, got {}", bytes.len())))
}

/// Relative path with `/` separators regardless of platform
pub(crate) fn portable_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Identity of the code a task runs.
///
/// Changing either part invalidates every key derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImplementationIdentity {
    /// Stable name of the implementation
    pub name: String,
    /// Version of the implementation
    pub version: String,
}

impl ImplementationIdentity {
    /// Create an identity
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for ImplementationIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// A named task input and its fingerprint, if it could be observed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInput {
    /// Name of the input as declared by the task
    pub name: String,
    /// Content fingerprint; `None` when the input could not be observed
    pub fingerprint: Option<Fingerprint>,
}

impl TaskInput {
    /// Input with a known fingerprint
    #[must_use]
    pub fn new(name: impl Into<String>, fingerprint: Fingerprint) -> Self {
        Self {
            name: name.into(),
            fingerprint: Some(fingerprint),
        }
    }

    /// Input whose fingerprint could not be computed
    #[must_use]
    pub fn unavailable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fingerprint: None,
        }
    }

    /// Input backed by a file.
    ///
    /// Fails with [`Error::InputUnavailable`] if the file cannot be read.
    pub fn file(name: impl Into<String>, path: &Path) -> Result<Self> {
        let name = name.into();
        let fingerprint = observe(&name, path, Fingerprint::of_file(path))?;
        Ok(Self::new(name, fingerprint))
    }

    /// Input backed by a directory tree.
    ///
    /// Fails with [`Error::InputUnavailable`] if the directory cannot be walked.
    pub fn directory(name: impl Into<String>, path: &Path) -> Result<Self> {
        let name = name.into();
        if !path.is_dir() {
            return Err(Error::input_unavailable(name, Some(path), "not a directory"));
        }
        let fingerprint = observe(&name, path, Fingerprint::of_directory(path))?;
        Ok(Self::new(name, fingerprint))
    }
}

fn observe(name: &str, path: &Path, result: Result<Fingerprint>) -> Result<Fingerprint> {
    result.map_err(|e| match e {
        Error::Io { source, .. } => Error::input_unavailable(name, Some(path), source.to_string()),
        other => other,
    })
}

/// Everything the cache needs to know about a task to derive its key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Code the task runs
    pub implementation: ImplementationIdentity,
    /// Inputs in declaration order
    pub inputs: Vec<TaskInput>,
    /// Declared output paths, relative to the workspace
    pub outputs: Vec<String>,
}

impl TaskDescriptor {
    /// Descriptor with no inputs or outputs
    #[must_use]
    pub const fn new(implementation: ImplementationIdentity) -> Self {
        Self {
            implementation,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Append an input
    #[must_use]
    pub fn with_input(mut self, input: TaskInput) -> Self {
        self.inputs.push(input);
        self
    }

    /// Append a declared output
    #[must_use]
    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.outputs.push(output.into());
        self
    }
}
