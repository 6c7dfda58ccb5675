//! Error types for the serialization crate

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Error type for encoding and decoding operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error while reading from or writing to the underlying stream
    #[error("I/O {operation} failed")]
    #[diagnostic(code(kiln::serialize::io))]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Operation that failed (e.g., "write", "read")
        operation: String,
    },

    /// A record carried a tag that no codec is registered for
    #[error("No codec registered for type tag {tag}")]
    #[diagnostic(
        code(kiln::serialize::unknown_tag),
        help("The stream was probably written by a newer registry with additional tags")
    )]
    UnknownTag {
        /// The tag read from the stream
        tag: u8,
    },

    /// Two registrations used the same tag
    #[error("Type tag {tag} is already registered for {existing}")]
    #[diagnostic(code(kiln::serialize::duplicate_tag))]
    DuplicateTag {
        /// The conflicting tag
        tag: u8,
        /// Type name of the existing registration
        existing: &'static str,
    },

    /// The same type was registered twice
    #[error("Type {type_name} is already registered")]
    #[diagnostic(code(kiln::serialize::duplicate_type))]
    DuplicateType {
        /// Type name of the duplicate registration
        type_name: &'static str,
    },

    /// A codec tried to claim the fallback tag
    #[error("Type tag {tag:#04x} is reserved for the object fallback")]
    #[diagnostic(code(kiln::serialize::reserved_tag))]
    ReservedTag {
        /// The reserved tag
        tag: u8,
    },

    /// Value has no codec and is unknown to the bound serialization context
    #[error("Cannot encode value of type {type_name}: no codec and not portable in context '{context}'")]
    #[diagnostic(
        code(kiln::serialize::unsupported_type),
        help("Register a codec for the type or add it to the serialization context")
    )]
    UnsupportedType {
        /// Rust type name of the value, or its `TypeId` when the name is unknown
        type_name: String,
        /// Name of the bound serialization context
        context: String,
    },

    /// Fallback payload names a type the bound context cannot load
    #[error("Serialization context '{context}' cannot resolve type '{type_name}'")]
    #[diagnostic(code(kiln::serialize::unresolved_type))]
    UnresolvedType {
        /// Portable type name read from the stream
        type_name: String,
        /// Name of the bound serialization context
        context: String,
    },

    /// A typed read produced a value of another type
    #[error("Expected a value of type {expected}")]
    #[diagnostic(code(kiln::serialize::type_mismatch))]
    TypeMismatch {
        /// Rust type name the caller asked for
        expected: &'static str,
    },

    /// Structurally invalid payload on a registered codec path
    #[error("Malformed payload: {message}")]
    #[diagnostic(code(kiln::serialize::malformed))]
    Malformed {
        /// Description of the problem
        message: String,
    },

    /// Fallback object encoding failed
    #[error("Object encoding failed: {message}")]
    #[diagnostic(code(kiln::serialize::object))]
    Object {
        /// Error message from the object encoder
        message: String,
    },
}

impl Error {
    /// Create an I/O error for the given operation
    #[must_use]
    pub fn io(source: std::io::Error, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            operation: operation.into(),
        }
    }

    /// Create a malformed payload error
    #[must_use]
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed {
            message: msg.into(),
        }
    }

    /// Whether this error means the stream ended in the middle of a value
    #[must_use]
    pub fn is_unexpected_eof(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}

/// Result type for serialization operations
pub type Result<T> = std::result::Result<T, Error>;
