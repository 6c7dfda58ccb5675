//! Tasks as seen by the execution coordinator

use crate::{CachePolicy, Cacheability, CacheabilityRules, Result};
use async_trait::async_trait;
use kiln_cache::TaskDescriptor;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// The work a task performs
#[async_trait]
pub trait TaskAction: Send + Sync {
    /// Run the task inside `workspace`, writing its declared outputs there
    async fn run(&self, workspace: &Path) -> std::result::Result<(), String>;
}

/// [`TaskAction`] backed by a synchronous closure
pub struct FnAction<F>(F);

impl<F> FnAction<F>
where
    F: Fn(&Path) -> std::result::Result<(), String> + Send + Sync,
{
    /// Wrap a closure
    pub const fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> TaskAction for FnAction<F>
where
    F: Fn(&Path) -> std::result::Result<(), String> + Send + Sync,
{
    async fn run(&self, workspace: &Path) -> std::result::Result<(), String> {
        (self.0)(workspace)
    }
}

/// A ready task handed to the coordinator by the scheduler
#[derive(Clone)]
pub struct Task {
    /// Task name, unique within a build
    pub name: String,
    /// Identity, inputs and outputs used to derive the cache key
    pub descriptor: TaskDescriptor,
    /// Caching verdict, fixed for this build
    pub cacheability: Cacheability,
    /// What the task does
    pub action: Arc<dyn TaskAction>,
}

impl Task {
    /// Task with an explicit verdict
    pub fn new(
        name: impl Into<String>,
        descriptor: TaskDescriptor,
        cacheability: Cacheability,
        action: impl TaskAction + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            descriptor,
            cacheability,
            action: Arc::new(action),
        }
    }

    /// Task whose verdict is derived from `rules` and `policy`
    ///
    /// # Errors
    ///
    /// Propagates [`CacheabilityRules::evaluate`] failures.
    pub fn with_policy(
        name: impl Into<String>,
        descriptor: TaskDescriptor,
        rules: &CacheabilityRules,
        policy: &CachePolicy,
        action: impl TaskAction + 'static,
    ) -> Result<Self> {
        let cacheability = rules.evaluate(&descriptor, policy)?;
        Ok(Self::new(name, descriptor, cacheability, action))
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("descriptor", &self.descriptor)
            .field("cacheability", &self.cacheability)
            .finish_non_exhaustive()
    }
}
