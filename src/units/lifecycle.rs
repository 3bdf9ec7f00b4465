//! # Lifecycle operations and unit exports.
//!
//! User code supplies a unit as [`UnitExports`]: ordered sequences of
//! [`LifecycleOp`]s per [`Phase`]. A loader ([`Load`]) resolves them lazily for
//! applications; parcels receive them directly or through a deferred config.
//!
//! At the validation boundary ([`UnitExports::validate`]) every sequence is
//! normalized into a [`Lifecycle`] that runs its operations one after another
//! and stops at the first failure.
//!
//! ## Example
//! ```rust
//! use mountvisor::{LifecycleFn, Phase, Props, UnitExports};
//!
//! let exports = UnitExports::new()
//!     .mount(|props| async move {
//!         let _ = props.name();
//!         anyhow::Ok(())
//!     })
//!     .with_op(Phase::Unmount, LifecycleFn::arc(|_props: Props| async { anyhow::Ok(()) }));
//! assert!(exports.has(Phase::Mount));
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use anyhow::anyhow;
use futures::FutureExt;
use futures::future::{self, BoxFuture};

use crate::config::TimeoutOverrides;
use crate::error::InvalidExports;

use super::props::Props;
use super::status::Phase;

/// Boxed future returned by a lifecycle operation.
pub type BoxLifecycleFuture = BoxFuture<'static, anyhow::Result<()>>;

/// Boxed future returned by a loader.
pub type BoxLoadFuture = BoxFuture<'static, anyhow::Result<UnitExports>>;

/// One step of a lifecycle phase.
pub trait LifecycleOp: Send + Sync + 'static {
    /// Starts the operation; a fresh future per call.
    fn call(&self, props: Props) -> BoxLifecycleFuture;
}

/// Shared handle to a lifecycle operation.
pub type LifecycleRef = Arc<dyn LifecycleOp>;

/// Closure-backed [`LifecycleOp`].
pub struct LifecycleFn<F> {
    f: F,
}

impl<F> LifecycleFn<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Creates the operation as a shared handle.
    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

impl<F, Fut> LifecycleOp for LifecycleFn<F>
where
    F: Fn(Props) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn call(&self, props: Props) -> BoxLifecycleFuture {
        Box::pin((self.f)(props))
    }
}

/// Produces a unit's exports.
pub trait Load: Send + Sync + 'static {
    fn load(&self, props: Props) -> BoxLoadFuture;
}

/// Shared handle to a loader.
pub type LoadRef = Arc<dyn Load>;

/// Closure-backed [`Load`].
pub struct LoadFn<F> {
    f: F,
}

impl<F> LoadFn<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }

    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

impl<F, Fut> Load for LoadFn<F>
where
    F: Fn(Props) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<UnitExports>> + Send + 'static,
{
    fn load(&self, props: Props) -> BoxLoadFuture {
        Box::pin((self.f)(props))
    }
}

/// Loader that resolves pre-built exports.
pub(crate) struct Ready(pub(crate) UnitExports);

impl Load for Ready {
    fn load(&self, _props: Props) -> BoxLoadFuture {
        future::ready(Ok(self.0.clone())).boxed()
    }
}

/// What a unit exposes: lifecycle sequences per phase plus timeout overrides.
///
/// Absent phases and present-but-empty phases are different things:
/// `mount`/`unmount` must be present, and any phase that is present must hold at
/// least one operation.
#[derive(Clone, Default)]
pub struct UnitExports {
    name: Option<String>,
    ops: HashMap<Phase, Vec<LifecycleRef>>,
    timeouts: TimeoutOverrides,
}

impl UnitExports {
    pub fn new() -> Self {
        Self::default()
    }

    /// Display name (used by parcels; applications keep their registered name).
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Appends one operation to the sequence of `phase`.
    pub fn with_op(mut self, phase: Phase, op: LifecycleRef) -> Self {
        self.ops.entry(phase).or_default().push(op);
        self
    }

    /// Replaces the whole sequence of `phase` (an empty vector is invalid).
    pub fn with_ops(mut self, phase: Phase, ops: Vec<LifecycleRef>) -> Self {
        self.ops.insert(phase, ops);
        self
    }

    /// Timeout overrides applied on top of registration overrides.
    pub fn with_timeouts(mut self, timeouts: TimeoutOverrides) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn bootstrap<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Props) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.with_op(Phase::Bootstrap, LifecycleFn::arc(f))
    }

    pub fn mount<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Props) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.with_op(Phase::Mount, LifecycleFn::arc(f))
    }

    pub fn unmount<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Props) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.with_op(Phase::Unmount, LifecycleFn::arc(f))
    }

    pub fn unload<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Props) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.with_op(Phase::Unload, LifecycleFn::arc(f))
    }

    pub fn update<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Props) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.with_op(Phase::Update, LifecycleFn::arc(f))
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn timeouts(&self) -> &TimeoutOverrides {
        &self.timeouts
    }

    /// True if `phase` is present (possibly empty).
    pub fn has(&self, phase: Phase) -> bool {
        self.ops.contains_key(&phase)
    }

    /// Checks the exports and normalizes them into runnable lifecycles.
    ///
    /// Missing `bootstrap`/`unload` become no-ops; a missing `update` stays absent.
    pub fn validate(&self) -> Result<Lifecycles, InvalidExports> {
        let optional = |phase: Phase, err: InvalidExports| match self.ops.get(&phase) {
            None => Ok(None),
            Some(ops) => Lifecycle::from_ops(ops).map(Some).ok_or(err),
        };
        let required = |phase: Phase, err: InvalidExports| {
            self.ops
                .get(&phase)
                .and_then(|ops| Lifecycle::from_ops(ops))
                .ok_or(err)
        };

        let bootstrap = optional(Phase::Bootstrap, InvalidExports::InvalidBootstrap)?;
        let mount = required(Phase::Mount, InvalidExports::MissingMount)?;
        let unmount = required(Phase::Unmount, InvalidExports::MissingUnmount)?;
        let unload = optional(Phase::Unload, InvalidExports::InvalidUnload)?;
        let update = optional(Phase::Update, InvalidExports::InvalidUpdate)?;

        Ok(Lifecycles {
            bootstrap: bootstrap.unwrap_or_else(Lifecycle::noop),
            mount,
            unmount,
            unload: unload.unwrap_or_else(Lifecycle::noop),
            update,
        })
    }
}

impl fmt::Debug for UnitExports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut phases: Vec<_> = self
            .ops
            .iter()
            .map(|(phase, ops)| (phase.as_str(), ops.len()))
            .collect();
        phases.sort_unstable();
        f.debug_struct("UnitExports")
            .field("name", &self.name)
            .field("phases", &phases)
            .finish_non_exhaustive()
    }
}

/// Normalized sequence of operations for one phase.
#[derive(Clone)]
pub struct Lifecycle {
    ops: Arc<[LifecycleRef]>,
}

impl Lifecycle {
    fn from_ops(ops: &[LifecycleRef]) -> Option<Self> {
        if ops.is_empty() {
            return None;
        }
        Some(Self { ops: ops.into() })
    }

    /// Resolves immediately.
    pub(crate) fn noop() -> Self {
        Self {
            ops: Arc::from(Vec::new()),
        }
    }

    /// Runs every operation in order, stopping at the first failure.
    ///
    /// Panics in user code (while starting or polling) become rejections.
    pub(crate) fn run(&self, props: Props) -> BoxLifecycleFuture {
        let ops = Arc::clone(&self.ops);
        async move {
            for op in ops.iter() {
                invoke(op, props.clone()).await?;
            }
            Ok(())
        }
        .boxed()
    }
}

fn invoke(op: &LifecycleRef, props: Props) -> BoxLifecycleFuture {
    match catch_unwind(AssertUnwindSafe(|| op.call(props))) {
        Ok(fut) => AssertUnwindSafe(fut)
            .catch_unwind()
            .map(|res| {
                res.unwrap_or_else(|payload| {
                    Err(anyhow!(
                        "lifecycle function panicked: {}",
                        panic_message(payload.as_ref())
                    ))
                })
            })
            .boxed(),
        Err(payload) => future::ready(Err(anyhow!(
            "lifecycle function panicked: {}",
            panic_message(payload.as_ref())
        )))
        .boxed(),
    }
}

/// Validated lifecycles of a loaded unit.
#[derive(Clone)]
pub struct Lifecycles {
    pub(crate) bootstrap: Lifecycle,
    pub(crate) mount: Lifecycle,
    pub(crate) unmount: Lifecycle,
    pub(crate) unload: Lifecycle,
    pub(crate) update: Option<Lifecycle>,
}

impl Lifecycles {
    pub(crate) fn get(&self, phase: Phase) -> Option<&Lifecycle> {
        match phase {
            Phase::Bootstrap => Some(&self.bootstrap),
            Phase::Mount => Some(&self.mount),
            Phase::Unmount => Some(&self.unmount),
            Phase::Unload => Some(&self.unload),
            Phase::Update => self.update.as_ref(),
        }
    }

    pub fn has_update(&self) -> bool {
        self.update.is_some()
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_op() -> LifecycleRef {
        LifecycleFn::arc(|_props: Props| async { anyhow::Ok(()) })
    }

    #[test]
    fn test_missing_mount_rejected() {
        let exports = UnitExports::new().with_op(Phase::Unmount, ok_op());
        assert_eq!(exports.validate().err(), Some(InvalidExports::MissingMount));
    }

    #[test]
    fn test_missing_unmount_rejected() {
        let exports = UnitExports::new().with_op(Phase::Mount, ok_op());
        assert_eq!(exports.validate().err(), Some(InvalidExports::MissingUnmount));
    }

    #[test]
    fn test_empty_optional_phase_rejected() {
        let exports = UnitExports::new()
            .with_op(Phase::Mount, ok_op())
            .with_op(Phase::Unmount, ok_op())
            .with_ops(Phase::Bootstrap, Vec::new());
        assert_eq!(
            exports.validate().err(),
            Some(InvalidExports::InvalidBootstrap)
        );
    }

    #[test]
    fn test_optional_phases_default() {
        let lifecycles = UnitExports::new()
            .with_op(Phase::Mount, ok_op())
            .with_op(Phase::Unmount, ok_op())
            .validate()
            .unwrap();
        assert!(!lifecycles.has_update());
        assert!(lifecycles.get(Phase::Bootstrap).is_some());
        assert!(lifecycles.get(Phase::Update).is_none());
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
    }
}
