//! Cacheability decisions
//!
//! Whether a task's outputs may be cached is a single immutable verdict,
//! [`Cacheability`]. A verdict is either cacheable, or not cacheable with a
//! non-empty [`DisabledReason`]; no other combination can be constructed.
//!
//! [`CacheabilityRules`] derive the verdict for a task from the build
//! configuration and the task's [`CachePolicy`].

use crate::{Error, Result};
use kiln_cache::TaskDescriptor;
use std::fmt;
use std::sync::Arc;

/// Why a task's outputs are not cached. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DisabledReason(String);

impl DisabledReason {
    /// Validate a reason.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConstructionViolation`] if `reason` is empty.
    pub fn new(reason: impl Into<String>) -> Result<Self> {
        let reason = reason.into();
        if reason.is_empty() {
            return Err(Error::construction_violation(
                "a not-cacheable verdict requires a non-empty reason",
            ));
        }
        Ok(Self(reason))
    }

    /// The reason text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DisabledReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Caching verdict for one task
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Cacheability {
    /// Outputs may be looked up in and stored to the cache
    Cacheable,
    /// Outputs are never cached
    NotCacheable(DisabledReason),
}

impl Cacheability {
    /// The cacheable verdict
    pub const CACHEABLE: Self = Self::Cacheable;

    /// A not-cacheable verdict.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConstructionViolation`] if `reason` is empty.
    pub fn not_cacheable(reason: impl Into<String>) -> Result<Self> {
        DisabledReason::new(reason).map(Self::NotCacheable)
    }

    /// Whether caching applies
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        matches!(self, Self::Cacheable)
    }

    /// Reason caching does not apply, if it does not
    #[must_use]
    pub fn disabled_reason(&self) -> Option<&str> {
        match self {
            Self::Cacheable => None,
            Self::NotCacheable(reason) => Some(reason.as_str()),
        }
    }
}

impl fmt::Display for Cacheability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cacheable => f.write_str("cacheable"),
            Self::NotCacheable(reason) => write!(f, "not cacheable: {reason}"),
        }
    }
}

/// Reason reported when caching is switched off for the whole build
pub const CACHING_DISABLED: &str = "Task output caching is disabled";
/// Reason reported for a cacheable task without outputs
pub const NO_OUTPUTS: &str = "No outputs declared";
/// Reason reported for a task that never asked to be cached
pub const NOT_ENABLED: &str = "Caching has not been enabled for the task";

type SkipPredicate = Arc<dyn Fn(&TaskDescriptor) -> bool + Send + Sync>;

/// What a task asks of the cache
#[derive(Clone, Default)]
pub struct CachePolicy {
    cacheable: bool,
    skip_conditions: Vec<(String, SkipPredicate)>,
}

impl CachePolicy {
    /// Policy of a task that wants its outputs cached
    #[must_use]
    pub fn cacheable() -> Self {
        Self {
            cacheable: true,
            skip_conditions: Vec::new(),
        }
    }

    /// Policy of a task that never asked for caching
    #[must_use]
    pub fn not_requested() -> Self {
        Self::default()
    }

    /// Skip caching with `reason` whenever `predicate` holds for the task
    #[must_use]
    pub fn do_not_cache_if(
        mut self,
        reason: impl Into<String>,
        predicate: impl Fn(&TaskDescriptor) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.skip_conditions
            .push((reason.into(), Arc::new(predicate)));
        self
    }

    /// Whether the task asked for caching
    #[must_use]
    pub const fn is_requested(&self) -> bool {
        self.cacheable
    }
}

impl fmt::Debug for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachePolicy")
            .field("cacheable", &self.cacheable)
            .field(
                "skip_conditions",
                &self
                    .skip_conditions
                    .iter()
                    .map(|(reason, _)| reason.as_str())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Derives a [`Cacheability`] verdict for each task.
///
/// Rules are checked in order and the first that applies decides:
/// 1. caching disabled for the build
/// 2. a matching [`CachePolicy::do_not_cache_if`] condition
/// 3. no declared outputs
/// 4. caching not requested by the task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheabilityRules {
    caching_enabled: bool,
}

impl Default for CacheabilityRules {
    fn default() -> Self {
        Self::new(true)
    }
}

impl CacheabilityRules {
    /// Rules for a build with caching switched on or off
    #[must_use]
    pub const fn new(caching_enabled: bool) -> Self {
        Self { caching_enabled }
    }

    /// Decide whether `descriptor`'s outputs may be cached under `policy`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConstructionViolation`] if a matching skip condition
    /// has an empty reason.
    pub fn evaluate(
        &self,
        descriptor: &TaskDescriptor,
        policy: &CachePolicy,
    ) -> Result<Cacheability> {
        if !self.caching_enabled {
            return Cacheability::not_cacheable(CACHING_DISABLED);
        }
        if let Some((reason, _)) = policy
            .skip_conditions
            .iter()
            .find(|(_, predicate)| predicate(descriptor))
        {
            return Cacheability::not_cacheable(reason.clone());
        }
        if descriptor.outputs.is_empty() {
            return Cacheability::not_cacheable(NO_OUTPUTS);
        }
        if !policy.cacheable {
            return Cacheability::not_cacheable(NOT_ENABLED);
        }
        Ok(Cacheability::CACHEABLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_cache::ImplementationIdentity;

    fn descriptor(outputs: &[&str]) -> TaskDescriptor {
        outputs.iter().fold(
            TaskDescriptor::new(ImplementationIdentity::new("compile", "1")),
            |d, out| d.with_output(*out),
        )
    }

    // ==========================================================================
    // Cacheability tests
    // ==========================================================================

    #[test]
    fn test_cacheable_has_no_reason() {
        assert!(Cacheability::CACHEABLE.is_enabled());
        assert_eq!(Cacheability::CACHEABLE.disabled_reason(), None);
        assert_eq!(Cacheability::CACHEABLE.to_string(), "cacheable");
    }

    #[test]
    fn test_not_cacheable_keeps_reason() {
        let verdict = Cacheability::not_cacheable("outputs depend on wall-clock time").unwrap();
        assert!(!verdict.is_enabled());
        assert_eq!(
            verdict.disabled_reason(),
            Some("outputs depend on wall-clock time")
        );
        assert_eq!(
            verdict.to_string(),
            "not cacheable: outputs depend on wall-clock time"
        );
    }

    #[test]
    fn test_empty_reason_is_construction_violation() {
        assert!(matches!(
            Cacheability::not_cacheable(""),
            Err(Error::ConstructionViolation { .. })
        ));
        assert!(DisabledReason::new(String::new()).is_err());
    }

    // ==========================================================================
    // Rule evaluation tests
    // ==========================================================================

    #[test]
    fn test_disabled_build_wins_over_everything() {
        let rules = CacheabilityRules::new(false);
        let policy = CachePolicy::cacheable().do_not_cache_if("never", |_| true);
        let verdict = rules.evaluate(&descriptor(&[]), &policy).unwrap();
        assert_eq!(verdict.disabled_reason(), Some(CACHING_DISABLED));
    }

    #[test]
    fn test_first_matching_skip_condition_reported() {
        let policy = CachePolicy::cacheable()
            .do_not_cache_if("first", |d| d.outputs.len() > 5)
            .do_not_cache_if("second", |d| d.outputs.contains(&"out.bin".to_string()))
            .do_not_cache_if("third", |_| true);
        let verdict = CacheabilityRules::default()
            .evaluate(&descriptor(&["out.bin"]), &policy)
            .unwrap();
        assert_eq!(verdict.disabled_reason(), Some("second"));
    }

    #[test]
    fn test_skip_condition_checked_before_outputs() {
        let policy = CachePolicy::cacheable().do_not_cache_if("flaky", |_| true);
        let verdict = CacheabilityRules::default()
            .evaluate(&descriptor(&[]), &policy)
            .unwrap();
        assert_eq!(verdict.disabled_reason(), Some("flaky"));
    }

    #[test]
    fn test_no_outputs() {
        let verdict = CacheabilityRules::default()
            .evaluate(&descriptor(&[]), &CachePolicy::cacheable())
            .unwrap();
        assert_eq!(verdict.disabled_reason(), Some(NO_OUTPUTS));
    }

    #[test]
    fn test_not_requested() {
        let verdict = CacheabilityRules::default()
            .evaluate(&descriptor(&["out.bin"]), &CachePolicy::not_requested())
            .unwrap();
        assert_eq!(verdict.disabled_reason(), Some(NOT_ENABLED));
        assert!(!CachePolicy::not_requested().is_requested());
    }

    #[test]
    fn test_cacheable_task() {
        let policy = CachePolicy::cacheable().do_not_cache_if("never matches", |_| false);
        let verdict = CacheabilityRules::default()
            .evaluate(&descriptor(&["out.bin"]), &policy)
            .unwrap();
        assert_eq!(verdict, Cacheability::CACHEABLE);
    }

    #[test]
    fn test_empty_skip_reason_rejected_when_matched() {
        let policy = CachePolicy::cacheable().do_not_cache_if("", |_| true);
        assert!(matches!(
            CacheabilityRules::default().evaluate(&descriptor(&["out.bin"]), &policy),
            Err(Error::ConstructionViolation { .. })
        ));
    }
}
