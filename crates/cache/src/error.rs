//! Error types for the cache crate

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for cache operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// A declared task input could not be fingerprinted
    #[error("Input '{input}' is unavailable{}: {reason}", path.as_ref().map_or(String::new(), |p| format!(" at {}", p.display())))]
    #[diagnostic(
        code(kiln::cache::input_unavailable),
        help("Ensure the input exists and is readable before the task is scheduled")
    )]
    InputUnavailable {
        /// Name of the input as declared by the task
        input: String,
        /// Filesystem location of the input, if it has one
        path: Option<Box<Path>>,
        /// Why the input could not be observed
        reason: String,
    },

    /// The same key was written with different content
    #[error("Cache key collision: {key} already holds different content")]
    #[diagnostic(
        code(kiln::cache::key_collision),
        help("Equal keys must always describe identical outputs; check the task's declared inputs")
    )]
    KeyCollision {
        /// The colliding cache key
        key: String,
    },

    /// The cache backend could not be reached or failed
    #[error("Cache backend '{backend}' unavailable: {message}")]
    #[diagnostic(code(kiln::cache::store_unavailable))]
    StoreUnavailable {
        /// Name of the backend
        backend: String,
        /// What went wrong
        message: String,
    },

    /// I/O error during cache operations
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(kiln::cache::io),
        help("Check file permissions and ensure the path exists")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "read", "write", "create")
        operation: String,
    },

    /// Configuration or validation error
    #[error("Cache configuration error: {message}")]
    #[diagnostic(code(kiln::cache::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(code(kiln::cache::serialization))]
    Serialization {
        /// Error message describing the serialization issue
        message: String,
    },

    /// A string could not be parsed as a key or fingerprint
    #[error("Invalid digest '{value}': {reason}")]
    #[diagnostic(
        code(kiln::cache::invalid_key),
        help("Keys and fingerprints are 64 hexadecimal characters")
    )]
    InvalidKey {
        /// The rejected input
        value: String,
        /// Why it was rejected
        reason: String,
    },
}

impl Error {
    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create an I/O error without path context
    #[must_use]
    pub fn io_no_path(source: std::io::Error, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: None,
            operation: operation.into(),
        }
    }

    /// Create a serialization error
    #[must_use]
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create an unavailable-input error
    #[must_use]
    pub fn input_unavailable(
        input: impl Into<String>,
        path: Option<&Path>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InputUnavailable {
            input: input.into(),
            path: path.map(Into::into),
            reason: reason.into(),
        }
    }

    /// Create a backend failure
    #[must_use]
    pub fn store_unavailable(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Whether this error is a recoverable backend failure
    #[must_use]
    pub const fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }
}

impl From<kiln_serialize::Error> for Error {
    fn from(err: kiln_serialize::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, Error>;
