//! Error types for task execution

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for task execution
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// A value was constructed in violation of its invariants
    #[error("Construction violation: {message}")]
    #[diagnostic(
        code(kiln::tasks::construction_violation),
        help("This is a programming error in the code that built the value")
    )]
    ConstructionViolation {
        /// What was violated
        message: String,
    },

    /// A task's action reported failure
    #[error("Task '{task}' failed: {message}")]
    #[diagnostic(code(kiln::tasks::failed))]
    TaskFailed {
        /// Task name
        task: String,
        /// Failure reported by the action
        message: String,
    },

    /// Cache interaction failed
    #[error(transparent)]
    #[diagnostic(transparent)]
    Cache(#[from] kiln_cache::Error),

    /// Execution was cancelled before the task completed
    #[error("Task '{task}' was cancelled")]
    #[diagnostic(code(kiln::tasks::cancelled))]
    Cancelled {
        /// Task name
        task: String,
    },

    /// I/O error during task execution
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(kiln::tasks::io),
        help("Check file permissions and ensure the path exists")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed
        operation: String,
    },

    /// Configuration or validation error
    #[error("Task configuration error: {message}")]
    #[diagnostic(code(kiln::tasks::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },
}

impl Error {
    /// Create a construction violation
    #[must_use]
    pub fn construction_violation(msg: impl Into<String>) -> Self {
        Self::ConstructionViolation {
            message: msg.into(),
        }
    }

    /// Create a task failure
    #[must_use]
    pub fn task_failed(task: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::TaskFailed {
            task: task.into(),
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

    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }
}

/// Result type for task execution
pub type Result<T> = std::result::Result<T, Error>;
