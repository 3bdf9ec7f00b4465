//! # Activation predicates.
//!
//! An [`Activity`] decides whether a unit should be active for a given
//! [`ActivationContext`]. The orchestrator never interprets the context; it only
//! hands the ambient value of the latest trigger to every predicate.
//!
//! Predicates are treated as untrusted: an `Err` or a panic is reported to the
//! caller as `Err`, and the orchestrator turns that into a broken unit.
//!
//! ## Example
//! ```rust
//! use mountvisor::{ActivationContext, Activity};
//!
//! let settings = Activity::new(|ctx| ctx.as_str().starts_with("/settings"));
//! let either = Activity::any([settings, Activity::new(|ctx| ctx.as_str() == "/")]);
//!
//! assert!(either.is_active(&ActivationContext::new("/")).unwrap());
//! assert!(!either.is_active(&ActivationContext::new("/about")).unwrap());
//! ```

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use anyhow::anyhow;

use super::lifecycle::panic_message;

/// Opaque ambient context handed to activation predicates (typically a location).
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ActivationContext(Arc<str>);

impl ActivationContext {
    pub fn new(value: impl Into<Arc<str>>) -> Self {
        Self(value.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ActivationContext {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ActivationContext {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for ActivationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

type ActivityFn = dyn Fn(&ActivationContext) -> anyhow::Result<bool> + Send + Sync;

/// Shared activation predicate.
#[derive(Clone)]
pub struct Activity {
    f: Arc<ActivityFn>,
}

impl Activity {
    /// Wraps an infallible predicate.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&ActivationContext) -> bool + Send + Sync + 'static,
    {
        Self {
            f: Arc::new(move |ctx| Ok(f(ctx))),
        }
    }

    /// Wraps a predicate that may fail.
    pub fn fallible<F>(f: F) -> Self
    where
        F: Fn(&ActivationContext) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }

    pub fn always() -> Self {
        Self::new(|_| true)
    }

    pub fn never() -> Self {
        Self::new(|_| false)
    }

    /// Active if any of `activities` is active (evaluated in order, short-circuit).
    ///
    /// The first failing predicate fails the whole combination.
    pub fn any(activities: impl IntoIterator<Item = Activity>) -> Self {
        let all: Vec<Activity> = activities.into_iter().collect();
        Self::fallible(move |ctx| {
            for activity in &all {
                if activity.is_active(ctx)? {
                    return Ok(true);
                }
            }
            Ok(false)
        })
    }

    /// Evaluates the predicate; panics are converted into errors.
    pub fn is_active(&self, ctx: &ActivationContext) -> anyhow::Result<bool> {
        match catch_unwind(AssertUnwindSafe(|| (self.f)(ctx))) {
            Ok(res) => res,
            Err(payload) => Err(anyhow!(
                "activity function panicked: {}",
                panic_message(payload.as_ref())
            )),
        }
    }
}

impl fmt::Debug for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Activity").finish_non_exhaustive()
    }
}
