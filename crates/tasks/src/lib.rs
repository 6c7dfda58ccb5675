//! Cache-aware task execution for kiln
//!
//! This crate decides whether a task's outputs may be cached and runs ready
//! tasks against a [`kiln_cache::CacheStore`]:
//! - [`CacheabilityRules`] turn a task's [`CachePolicy`] into an immutable
//!   [`Cacheability`] verdict
//! - [`ExecutionCoordinator`] drives each task through lookup, execution and
//!   storage on a bounded worker pool
//!
//! A cache hit restores outputs without running the task. Backend failures
//! never fail a task; they only cost a rebuild.

mod cacheability;
mod coordinator;
mod error;
mod task;

pub mod telemetry;

pub use cacheability::{
    CACHING_DISABLED, CachePolicy, Cacheability, CacheabilityRules, DisabledReason, NO_OUTPUTS,
    NOT_ENABLED,
};
pub use coordinator::{
    CoordinatorConfig, ExecutionCoordinator, Outcome, TaskReport, TaskState, TaskStatus,
};
pub use error::{Error, Result};
pub use task::{FnAction, Task, TaskAction};
