//! Cache-aware task execution
//!
//! Each task moves through a fixed state machine:
//!
//! ```text
//! Pending -> CacheabilityChecked -> CacheLookup -> Hit -> Done
//!                                -> CacheLookup -> Miss -> Executed -> CachePut -> Stored -> Done
//!                                -> Executed -> Done                 (not cacheable)
//! ```
//!
//! Any step can end in `Failed`. Only a successful execution reaches
//! `CachePut`, so failed runs never pollute the cache. Cache backend failures
//! degrade to plain execution and are never reported as task failures.

use crate::cacheability::CACHING_DISABLED;
use crate::{Error, Result, Task};
use kiln_cache::{CacheEntry, CacheKey, CacheStore, compute_cache_key};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Coordinator configuration
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Maximum parallel tasks (0 = unlimited)
    pub max_parallel: usize,
    /// Directory tasks run in; outputs are collected from and materialized here
    pub workspace_root: PathBuf,
    /// Whether the cache is consulted at all
    pub cache_enabled: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_parallel: 0,
            workspace_root: PathBuf::from("."),
            cache_enabled: true,
        }
    }
}

/// Step of a task's execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Not started
    Pending,
    /// Verdict known
    CacheabilityChecked,
    /// Querying the store
    CacheLookup,
    /// Entry found and materialized
    Hit,
    /// No usable entry
    Miss,
    /// Action ran successfully
    Executed,
    /// Storing the outputs
    CachePut,
    /// Outputs stored
    Stored,
    /// Finished successfully
    Done,
    /// Finished unsuccessfully
    Failed,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::CacheabilityChecked => "cacheability-checked",
            Self::CacheLookup => "cache-lookup",
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Executed => "executed",
            Self::CachePut => "cache-put",
            Self::Stored => "stored",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Terminal status of a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    /// The task's outputs are in place
    Done,
    /// The task failed
    Failed(String),
}

/// How a finished task's outputs were produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Materialized from a cache entry; the action did not run
    FromCache,
    /// The action ran
    Executed,
}

/// What happened to one task
#[derive(Debug, Clone)]
pub struct TaskReport {
    /// Task name
    pub name: String,
    /// States visited, in order, starting with [`TaskState::Pending`]
    pub transitions: Vec<TaskState>,
    /// Terminal status
    pub status: TaskStatus,
    /// How outputs were produced, for finished tasks
    pub outcome: Option<Outcome>,
    /// Cache key, if one was derived
    pub key: Option<CacheKey>,
    /// Why caching did not apply, if it did not
    pub disabled_reason: Option<String>,
    /// Why a successful execution left nothing in the cache
    pub not_stored: Option<String>,
    /// Wall time spent on the task
    pub duration: Duration,
}

impl TaskReport {
    fn lost(name: String, message: String) -> Self {
        Self {
            name,
            transitions: vec![TaskState::Pending, TaskState::Failed],
            status: TaskStatus::Failed(message),
            outcome: None,
            key: None,
            disabled_reason: None,
            not_stored: None,
            duration: Duration::ZERO,
        }
    }

    /// Whether the task finished successfully
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.status == TaskStatus::Done
    }

    /// Whether outputs came from the cache
    #[must_use]
    pub fn from_cache(&self) -> bool {
        self.outcome == Some(Outcome::FromCache)
    }

    /// Last state reached
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.transitions
            .last()
            .copied()
            .unwrap_or(TaskState::Pending)
    }

    /// Whether the task passed through `state`
    #[must_use]
    pub fn visited(&self, state: TaskState) -> bool {
        self.transitions.contains(&state)
    }
}

/// Records a task's path through the state machine
struct Progress<'a> {
    name: &'a str,
    transitions: Vec<TaskState>,
    key: Option<CacheKey>,
    disabled_reason: Option<String>,
    not_stored: Option<String>,
    started: Instant,
}

impl<'a> Progress<'a> {
    fn new(name: &'a str) -> Self {
        Self {
            name,
            transitions: vec![TaskState::Pending],
            key: None,
            disabled_reason: None,
            not_stored: None,
            started: Instant::now(),
        }
    }

    fn enter(&mut self, state: TaskState) {
        debug!(task = %self.name, %state, "Task state");
        self.transitions.push(state);
    }

    fn finish(mut self, outcome: Outcome) -> TaskReport {
        self.enter(TaskState::Done);
        self.report(TaskStatus::Done, Some(outcome))
    }

    fn fail(mut self, err: &Error) -> TaskReport {
        self.enter(TaskState::Failed);
        self.report(TaskStatus::Failed(err.to_string()), None)
    }

    fn report(self, status: TaskStatus, outcome: Option<Outcome>) -> TaskReport {
        TaskReport {
            name: self.name.to_string(),
            transitions: self.transitions,
            status,
            outcome,
            key: self.key,
            disabled_reason: self.disabled_reason,
            not_stored: self.not_stored,
            duration: self.started.elapsed(),
        }
    }
}

/// Runs ready tasks, reusing cached outputs where possible.
///
/// Cloning is cheap; clones share the store and the cancellation token.
#[derive(Clone)]
pub struct ExecutionCoordinator {
    config: Arc<CoordinatorConfig>,
    store: CacheStore,
    cancel: CancellationToken,
}

impl ExecutionCoordinator {
    /// Create a coordinator.
    ///
    /// # Errors
    ///
    /// Fails if the workspace root does not exist or is not a directory.
    pub fn new(config: CoordinatorConfig, store: CacheStore) -> Result<Self> {
        let root = &config.workspace_root;
        let meta = std::fs::metadata(root).map_err(|e| Error::io(e, root, "stat"))?;
        if !meta.is_dir() {
            return Err(Error::configuration(format!(
                "workspace root {} is not a directory",
                root.display()
            )));
        }
        Ok(Self {
            config: Arc::new(config),
            store,
            cancel: CancellationToken::new(),
        })
    }

    /// Use an externally owned cancellation token
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that cancels tasks which have not yet executed or stored outputs
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Run one task to a terminal state
    pub async fn execute(&self, task: &Task) -> TaskReport {
        let mut progress = Progress::new(&task.name);

        let disabled_reason = if self.config.cache_enabled {
            task.cacheability.disabled_reason()
        } else {
            Some(CACHING_DISABLED)
        };
        progress.enter(TaskState::CacheabilityChecked);

        if let Some(reason) = disabled_reason {
            info!(task = %task.name, reason, "Task not cacheable");
            progress.disabled_reason = Some(reason.to_string());
            return match self.run_action(task).await {
                Ok(()) => {
                    progress.enter(TaskState::Executed);
                    progress.finish(Outcome::Executed)
                }
                Err(e) => progress.fail(&e),
            };
        }

        let key = match compute_cache_key(&task.descriptor) {
            Ok(key) => key,
            Err(e) => {
                error!(task = %task.name, error = %e, "Failed to derive cache key");
                return progress.fail(&e.into());
            }
        };
        progress.key = Some(key);

        progress.enter(TaskState::CacheLookup);
        match self.store.get(&key).await {
            Ok(Some(entry)) => {
                progress.enter(TaskState::Hit);
                return match self.materialize(entry).await {
                    Ok(files) => {
                        info!(task = %task.name, %key, files, "Cache hit");
                        progress.finish(Outcome::FromCache)
                    }
                    Err(e) => {
                        error!(task = %task.name, %key, error = %e, "Failed to materialize cached outputs");
                        progress.fail(&e)
                    }
                };
            }
            Ok(None) => {
                info!(task = %task.name, %key, "Cache miss");
            }
            Err(e) if e.is_store_unavailable() => {
                warn!(task = %task.name, %key, error = %e, "Cache unavailable; executing task");
            }
            Err(e) => return progress.fail(&e.into()),
        }
        progress.enter(TaskState::Miss);

        if let Err(e) = self.run_action(task).await {
            return progress.fail(&e);
        }
        progress.enter(TaskState::Executed);

        if self.cancel.is_cancelled() {
            return progress.fail(&Error::Cancelled {
                task: task.name.clone(),
            });
        }
        progress.enter(TaskState::CachePut);

        let entry = match self.collect(task).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(task = %task.name, %key, error = %e, "Failed to collect outputs; not caching");
                progress.not_stored = Some(format!("output collection failed: {e}"));
                return progress.finish(Outcome::Executed);
            }
        };
        match self.store.put(&key, &entry).await {
            Ok(()) => {
                progress.enter(TaskState::Stored);
                progress.finish(Outcome::Executed)
            }
            Err(e @ kiln_cache::Error::KeyCollision { .. }) => {
                error!(task = %task.name, %key, error = %e, "Cache key collision");
                progress.fail(&e.into())
            }
            Err(e) => {
                warn!(task = %task.name, %key, error = %e, "Failed to store outputs");
                progress.not_stored = Some(e.to_string());
                progress.finish(Outcome::Executed)
            }
        }
    }

    /// Run independent tasks on a bounded worker pool.
    ///
    /// A failing task never stops its siblings. Reports are returned in the
    /// order the tasks were given.
    pub async fn execute_batch(&self, tasks: Vec<Task>) -> Vec<TaskReport> {
        let names: Vec<String> = tasks.iter().map(|t| t.name.clone()).collect();
        let mut reports: Vec<Option<TaskReport>> = vec![None; tasks.len()];
        let mut slots = HashMap::new();
        let mut pending = tasks.into_iter().enumerate();
        let mut join_set = JoinSet::new();

        loop {
            // Fill the concurrency window
            while self.config.max_parallel == 0 || join_set.len() < self.config.max_parallel {
                let Some((index, task)) = pending.next() else {
                    break;
                };
                let coordinator = self.clone();
                let handle = join_set.spawn(async move { coordinator.execute(&task).await });
                slots.insert(handle.id(), index);
            }

            let Some(joined) = join_set.join_next_with_id().await else {
                break;
            };
            match joined {
                Ok((id, report)) => {
                    if let Some(&index) = slots.get(&id) {
                        reports[index] = Some(report);
                    }
                }
                Err(e) => {
                    if let Some(&index) = slots.get(&e.id()) {
                        error!(task = %names[index], error = %e, "Task execution panicked");
                        reports[index] = Some(TaskReport::lost(
                            names[index].clone(),
                            format!("Task execution panicked: {e}"),
                        ));
                    }
                }
            }
        }

        reports
            .into_iter()
            .zip(names)
            .map(|(report, name)| {
                report.unwrap_or_else(|| TaskReport::lost(name, "task did not complete".into()))
            })
            .collect()
    }

    async fn run_action(&self, task: &Task) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled {
                task: task.name.clone(),
            });
        }
        info!(task = %task.name, "Executing task");
        task.action
            .run(&self.config.workspace_root)
            .await
            .map_err(|message| Error::task_failed(&task.name, message))
    }

    async fn materialize(&self, entry: CacheEntry) -> Result<usize> {
        let root = self.config.workspace_root.clone();
        blocking(move || entry.materialize(&root)).await
    }

    async fn collect(&self, task: &Task) -> Result<CacheEntry> {
        let root = self.config.workspace_root.clone();
        let outputs = task.descriptor.outputs.clone();
        blocking(move || CacheEntry::collect(&root, &outputs)).await
    }
}

impl fmt::Debug for ExecutionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionCoordinator")
            .field("config", &self.config)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

/// Run filesystem work off the async worker threads
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> kiln_cache::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::configuration(format!("blocking task failed: {e}")))?
        .map_err(Error::from)
}
