//! # Runtime: the public orchestration handle.
//!
//! [`Runtime`] is a cheap, clonable handle to one orchestrator instance: the
//! application registry, error handlers, event fan-out, routing state, and the
//! root owner of runtime-level parcels.
//!
//! ## Architecture
//! ```text
//! Runtime (Arc<Inner>)
//!   ├── registry      registered applications + unload records
//!   ├── routing       ambient context, started flag, cycle queue
//!   ├── handlers      error handlers
//!   ├── subs          inline subscribers ──┐
//!   ├── bus           broadcast receivers ─┴── publish(Event)
//!   └── root          owner of root parcels
//! ```
//!
//! ## Rules
//! - Every status change goes through [`Runtime::transition`] and publishes
//!   `status-changed`.
//! - No lock is held while user code (lifecycles, predicates, subscribers,
//!   handlers) runs.
//! - Operations that spawn work (`start`, `trigger_*`, `unload_application`,
//!   `mount_root_parcel`) must be called from within a Tokio runtime.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::config::{RuntimeConfig, TimeoutConfig, UnhandledErrorPolicy};
use crate::error::{ConfigError, Fault, ParcelError, RegistrationError, UnloadError, UnitError};
use crate::events::{Bus, Event, EventKind};
use crate::subscribers::{Subscribe, SubscriberSet};
use crate::units::unit::Unit;
use crate::units::{ActivationContext, Phase, Registration, UnitStatus};

use super::builder::RuntimeBuilder;
use super::handlers::{ErrorHandler, ErrorHandlers, handle_error};
use super::lifecycles::{UnloadHandle, UnloadOptions, request_unload};
use super::parcel::{self, ParcelConfig, ParcelHandle};
use super::registry::{PendingChanges, Registry};
use super::reroute::{self, RerouteHandle, RoutingState};

pub(crate) struct Inner {
    pub(crate) cfg: RwLock<RuntimeConfig>,
    pub(crate) registry: Registry,
    pub(crate) handlers: ErrorHandlers,
    pub(crate) subs: SubscriberSet,
    pub(crate) bus: Bus,
    pub(crate) routing: Mutex<RoutingState>,
    pub(crate) root: Arc<Unit>,
    before_first_mount: AtomicBool,
    first_mount: AtomicBool,
}

/// Handle to one orchestrator instance.
#[derive(Clone)]
pub struct Runtime {
    pub(crate) inner: Arc<Inner>,
}

impl Runtime {
    /// Creates a runtime with no subscribers and no error handlers.
    pub fn new(cfg: RuntimeConfig) -> Self {
        Self::from_parts(cfg, Vec::new(), Vec::new())
    }

    /// Returns a builder for configuring subscribers and handlers.
    pub fn builder(cfg: RuntimeConfig) -> RuntimeBuilder {
        RuntimeBuilder::new(cfg)
    }

    pub(crate) fn from_parts(
        cfg: RuntimeConfig,
        subscribers: Vec<Arc<dyn Subscribe>>,
        handlers: Vec<ErrorHandler>,
    ) -> Self {
        let bus = Bus::new(cfg.bus_capacity_clamped());
        let error_handlers = ErrorHandlers::default();
        for h in handlers {
            error_handlers.add(h);
        }
        Self {
            inner: Arc::new(Inner {
                cfg: RwLock::new(cfg),
                registry: Registry::default(),
                handlers: error_handlers,
                subs: SubscriberSet::new(subscribers),
                bus,
                routing: Mutex::new(RoutingState::default()),
                root: Arc::new(Unit::root()),
                before_first_mount: AtomicBool::new(false),
                first_mount: AtomicBool::new(false),
            }),
        }
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> RuntimeConfig {
        self.inner.cfg.read().clone()
    }

    pub(crate) fn unhandled_policy(&self) -> UnhandledErrorPolicy {
        self.inner.cfg.read().unhandled
    }

    // ---- timeouts ----

    /// Default bootstrap timeout for units loaded from now on.
    pub fn set_bootstrap_max_time(
        &self,
        duration: Duration,
        hard_fail: bool,
        warn_after: Option<Duration>,
    ) -> Result<(), ConfigError> {
        self.set_max_time(Phase::Bootstrap, duration, hard_fail, warn_after)
    }

    /// Default mount timeout for units loaded from now on.
    pub fn set_mount_max_time(
        &self,
        duration: Duration,
        hard_fail: bool,
        warn_after: Option<Duration>,
    ) -> Result<(), ConfigError> {
        self.set_max_time(Phase::Mount, duration, hard_fail, warn_after)
    }

    /// Default unmount timeout for units loaded from now on.
    pub fn set_unmount_max_time(
        &self,
        duration: Duration,
        hard_fail: bool,
        warn_after: Option<Duration>,
    ) -> Result<(), ConfigError> {
        self.set_max_time(Phase::Unmount, duration, hard_fail, warn_after)
    }

    /// Default unload timeout for units loaded from now on.
    pub fn set_unload_max_time(
        &self,
        duration: Duration,
        hard_fail: bool,
        warn_after: Option<Duration>,
    ) -> Result<(), ConfigError> {
        self.set_max_time(Phase::Unload, duration, hard_fail, warn_after)
    }

    fn set_max_time(
        &self,
        phase: Phase,
        duration: Duration,
        hard_fail: bool,
        warn_after: Option<Duration>,
    ) -> Result<(), ConfigError> {
        let cfg = TimeoutConfig::new(duration, hard_fail, warn_after)?;
        self.inner.cfg.write().timeouts.set(phase, cfg);
        Ok(())
    }

    // ---- registry ----

    /// Registers an application in `not-loaded`.
    ///
    /// Registration does not trigger a reroute; call [`Runtime::trigger_app_change`]
    /// (or [`Runtime::start`]) to act on it.
    pub fn register_application(&self, reg: Registration) -> Result<(), RegistrationError> {
        if reg.name.is_empty() {
            return Err(RegistrationError::EmptyName);
        }
        if !reg.custom.is_valid() {
            return Err(RegistrationError::InvalidCustomProps { name: reg.name });
        }
        let timeouts = self.inner.cfg.read().timeouts.merged(&reg.timeouts);
        let unit = Unit::application(
            Arc::from(reg.name.as_str()),
            reg.loader,
            reg.activity,
            reg.custom,
            reg.timeouts,
            timeouts,
        );
        self.inner.registry.register(Arc::new(unit))?;
        tracing::debug!(app = %reg.name, "registered");
        Ok(())
    }

    /// Unloads the application and then removes it from the registry.
    ///
    /// Fails immediately if `name` is not registered; the returned future
    /// resolves once the unit is unloaded and removed.
    pub fn unregister_application(
        &self,
        name: &str,
    ) -> Result<impl Future<Output = Result<(), UnloadError>> + Send + 'static, RegistrationError> {
        let handle = self.unload_application(name, UnloadOptions::default())?;
        let rt = self.clone();
        let name = name.to_string();
        Ok(async move {
            handle.await?;
            rt.inner.registry.remove(&name);
            tracing::debug!(app = %name, "unregistered");
            Ok(())
        })
    }

    /// Requests that an application be unloaded.
    ///
    /// Requests made while one is pending share its outcome.
    pub fn unload_application(
        &self,
        name: &str,
        opts: UnloadOptions,
    ) -> Result<UnloadHandle, RegistrationError> {
        let unit = self
            .inner
            .registry
            .find(name)
            .ok_or_else(|| RegistrationError::NotRegistered {
                name: name.to_string(),
            })?;
        Ok(request_unload(self, unit, opts))
    }

    /// Registered application names, in registration order.
    pub fn app_names(&self) -> Vec<String> {
        self.inner.registry.names()
    }

    /// Names of the applications currently `mounted`.
    pub fn mounted_apps(&self) -> Vec<String> {
        self.inner.registry.mounted_names()
    }

    pub fn app_status(&self, name: &str) -> Option<UnitStatus> {
        self.inner.registry.find(name).map(|u| u.status())
    }

    /// Names of the applications whose predicate is true for `ctx`.
    ///
    /// Predicate failures count as inactive and change nothing.
    pub fn check_activity_functions(&self, ctx: &ActivationContext) -> Vec<String> {
        self.inner
            .registry
            .snapshot()
            .iter()
            .filter(|u| {
                u.activity
                    .as_ref()
                    .is_some_and(|a| a.is_active(ctx).unwrap_or(false))
            })
            .map(|u| u.name().to_string())
            .collect()
    }

    // ---- routing ----

    /// Marks the runtime started and runs a full cycle.
    pub fn start(&self) -> RerouteHandle {
        self.inner.routing.lock().started = true;
        tracing::info!("runtime started");
        self.trigger_app_change()
    }

    pub fn is_started(&self) -> bool {
        self.inner.routing.lock().started
    }

    /// Switches the ambient context and requests a cycle.
    pub fn trigger_reroute(&self, ctx: impl Into<ActivationContext>) -> RerouteHandle {
        reroute::trigger(self, Some(ctx.into()))
    }

    /// Requests a cycle for the current ambient context.
    pub fn trigger_app_change(&self) -> RerouteHandle {
        reroute::trigger(self, None)
    }

    /// The current ambient context.
    pub fn context(&self) -> ActivationContext {
        self.inner.routing.lock().context.clone()
    }

    pub(crate) fn pending_changes(&self, ctx: &ActivationContext) -> PendingChanges {
        let cooldown = self.inner.cfg.read().load_error_cooldown;
        self.inner
            .registry
            .pending_changes(Instant::now(), cooldown, |unit| self.evaluate_activity(unit, ctx))
    }

    /// Evaluates `unit`'s predicate against the current ambient context.
    pub(crate) fn is_active_now(&self, unit: &Unit) -> bool {
        self.evaluate_activity(unit, &self.context())
    }

    /// A failing predicate breaks the unit and counts as inactive.
    fn evaluate_activity(&self, unit: &Unit, ctx: &ActivationContext) -> bool {
        let Some(activity) = &unit.activity else {
            return false;
        };
        match activity.is_active(ctx) {
            Ok(active) => active,
            Err(e) => {
                handle_error(self, Fault::Activation(format!("{e:#}")), unit, UnitStatus::Broken);
                false
            }
        }
    }

    // ---- errors ----

    /// Adds an error handler; returns the handle needed to remove it.
    pub fn add_error_handler<F>(&self, f: F) -> ErrorHandler
    where
        F: Fn(&UnitError) + Send + Sync + 'static,
    {
        let handler: ErrorHandler = Arc::new(f);
        self.inner.handlers.add(Arc::clone(&handler));
        handler
    }

    /// Removes a handler previously returned by [`Runtime::add_error_handler`].
    pub fn remove_error_handler(&self, handler: &ErrorHandler) -> bool {
        self.inner.handlers.remove(handler)
    }

    // ---- events ----

    /// Adds an inline subscriber.
    pub fn add_subscriber(&self, sub: Arc<dyn Subscribe>) {
        self.inner.subs.add(sub);
    }

    /// New broadcast receiver of every published event.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.bus.subscribe()
    }

    pub(crate) fn publish(&self, event: Event) {
        self.inner.subs.emit(&event);
        self.inner.bus.publish(event);
    }

    /// Sets `unit`'s status; returns the previous one.
    pub(crate) fn transition(&self, unit: &Unit, next: UnitStatus) -> UnitStatus {
        let (from, name) = {
            let mut st = unit.state.lock();
            (std::mem::replace(&mut st.status, next), Arc::clone(&st.name))
        };
        if from != next {
            self.announce(name, from, next);
        }
        from
    }

    /// Sets `unit`'s status only if it is currently one of `expected`.
    ///
    /// Returns the previous status, or the current one on mismatch.
    pub(crate) fn transition_from(
        &self,
        unit: &Unit,
        expected: &[UnitStatus],
        next: UnitStatus,
    ) -> Result<UnitStatus, UnitStatus> {
        let (from, name) = {
            let mut st = unit.state.lock();
            if !expected.contains(&st.status) {
                return Err(st.status);
            }
            (std::mem::replace(&mut st.status, next), Arc::clone(&st.name))
        };
        if from != next {
            self.announce(name, from, next);
        }
        Ok(from)
    }

    fn announce(&self, name: Arc<str>, from: UnitStatus, to: UnitStatus) {
        if !from.can_transition_to(to) {
            tracing::warn!(unit = %name, %from, %to, "unexpected status transition");
        }
        tracing::trace!(unit = %name, %from, %to, "status");
        self.publish(
            Event::new(EventKind::StatusChanged)
                .with_unit(name)
                .with_transition(from, to),
        );
    }

    pub(crate) fn mark_before_first_mount(&self) {
        if !self.inner.before_first_mount.swap(true, Ordering::SeqCst) {
            self.publish(Event::new(EventKind::BeforeFirstMount));
        }
    }

    pub(crate) fn mark_first_mount(&self) {
        if !self.inner.first_mount.swap(true, Ordering::SeqCst) {
            self.publish(Event::new(EventKind::FirstMount));
        }
    }

    // ---- parcels ----

    /// Mounts a parcel owned by the runtime itself.
    pub fn mount_root_parcel(
        &self,
        config: impl Into<ParcelConfig>,
        custom: Value,
    ) -> Result<ParcelHandle, ParcelError> {
        parcel::mount_parcel(self, &self.inner.root, config.into(), custom)
    }

    /// Returns the runtime to its just-constructed state.
    ///
    /// Registered applications, unload records, root parcels, error handlers,
    /// routing state, and first-mount milestones are cleared. Pending reroute
    /// and unload requests resolve as interrupted/abandoned. Subscribers and
    /// configuration are kept.
    pub fn reset(&self) {
        for slot in self.inner.registry.clear() {
            slot.abandon();
        }
        self.inner.routing.lock().interrupt();
        self.inner.root.parcels.lock().clear();
        self.inner.handlers.clear();
        self.inner.before_first_mount.store(false, Ordering::SeqCst);
        self.inner.first_mount.store(false, Ordering::SeqCst);
        tracing::debug!("runtime reset");
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("apps", &self.app_names())
            .field("started", &self.is_started())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use serde_json::json;

    use crate::error::ErrorKind;
    use crate::test_support::{Counters, ok_exports};
    use crate::units::Activity;

    #[test]
    fn test_register_validation() {
        let rt = Runtime::default();
        assert_eq!(
            rt.register_application(Registration::with_exports("", ok_exports())),
            Err(RegistrationError::EmptyName)
        );
        assert!(matches!(
            rt.register_application(Registration::with_exports("a", ok_exports()).custom_props(json!(1))),
            Err(RegistrationError::InvalidCustomProps { .. })
        ));
        rt.register_application(Registration::with_exports("a", ok_exports())).unwrap();
        assert!(matches!(
            rt.register_application(Registration::with_exports("a", ok_exports())),
            Err(RegistrationError::Duplicate { .. })
        ));
        assert_eq!(rt.app_names(), vec!["a".to_string()]);
        assert_eq!(rt.app_status("a"), Some(UnitStatus::NotLoaded));
    }

    #[test]
    fn test_timeout_setters() {
        let rt = Runtime::default();
        assert_eq!(
            rt.set_mount_max_time(Duration::ZERO, true, None),
            Err(ConfigError::NonPositiveDuration)
        );
        rt.set_mount_max_time(Duration::from_millis(50), true, None).unwrap();
        assert_eq!(rt.config().timeouts.mount.duration(), Duration::from_millis(50));
    }

    #[test]
    fn test_check_activity_functions() {
        let rt = Runtime::default();
        rt.register_application(
            Registration::with_exports("a", ok_exports())
                .activity(Activity::new(|ctx| ctx.as_str() == "/a")),
        )
        .unwrap();
        rt.register_application(
            Registration::with_exports("b", ok_exports())
                .activity(Activity::fallible(|_| Err(anyhow::anyhow!("bad")))),
        )
        .unwrap();

        assert_eq!(rt.check_activity_functions(&"/a".into()), vec!["a".to_string()]);
        assert_eq!(rt.app_status("b"), Some(UnitStatus::NotLoaded));
    }

    #[tokio::test]
    async fn test_failing_predicate_breaks_unit() {
        let rt = Runtime::default();
        let errors = crate::test_support::error_sink(&rt);
        rt.register_application(
            Registration::with_exports("b", ok_exports())
                .activity(Activity::fallible(|_| Err(anyhow::anyhow!("bad")))),
        )
        .unwrap();

        rt.start().await.unwrap();

        assert_eq!(rt.app_status("b"), Some(UnitStatus::Broken));
        assert_eq!(errors.lock()[0].kind, ErrorKind::Activation);
    }

    #[tokio::test]
    async fn test_unload_application_immediately() {
        let rt = Runtime::default();
        let counters = Counters::default();
        rt.register_application(Registration::with_exports("a", counters.exports()).activity(Activity::always()))
            .unwrap();
        rt.start().await.unwrap();
        assert_eq!(rt.app_status("a"), Some(UnitStatus::Mounted));

        let handle = rt.unload_application("a", UnloadOptions::default()).unwrap();
        handle.await.unwrap();

        assert_eq!(counters.unmount.load(Ordering::SeqCst), 1);
        assert_eq!(counters.unload.load(Ordering::SeqCst), 1);
        // the follow-up cycle loads and mounts it again
        rt.trigger_app_change().await.unwrap();
        assert_eq!(rt.app_status("a"), Some(UnitStatus::Mounted));
        assert_eq!(counters.mount.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unload_waiting_for_unmount() {
        let rt = Runtime::default();
        let counters = Counters::default();
        rt.register_application(
            Registration::with_exports("a", counters.exports())
                .activity(Activity::new(|ctx| ctx.as_str() == "/a")),
        )
        .unwrap();
        rt.trigger_reroute("/a").await.unwrap();
        rt.start().await.unwrap();

        let opts = UnloadOptions { wait_for_unmount: true };
        let first = rt.unload_application("a", opts).unwrap();
        let second = rt.unload_application("a", opts).unwrap();
        assert!(first.same_request(&second));
        assert!(first.is_pending());
        assert_eq!(rt.app_status("a"), Some(UnitStatus::Mounted));

        rt.trigger_reroute("/b").await.unwrap();
        first.await.unwrap();
        assert_eq!(rt.app_status("a"), Some(UnitStatus::NotLoaded));
        assert_eq!(counters.unload.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_immediate_unloads_share_one_run() {
        let rt = Runtime::default();
        let counters = Counters::default();
        rt.register_application(
            Registration::with_exports("a", counters.exports()).activity(Activity::always()),
        )
        .unwrap();
        rt.start().await.unwrap();

        let first = rt.unload_application("a", UnloadOptions::default()).unwrap();
        let second = rt.unload_application("a", UnloadOptions::default()).unwrap();
        assert!(first.same_request(&second));

        let (a, b) = futures::join!(first.into_future(), second.into_future());
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(counters.unmount.load(Ordering::SeqCst), 1);
        assert_eq!(counters.unload.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unregister() {
        let rt = Runtime::default();
        rt.register_application(Registration::with_exports("a", ok_exports()).activity(Activity::always()))
            .unwrap();
        rt.start().await.unwrap();

        assert!(matches!(
            rt.unregister_application("zzz"),
            Err(RegistrationError::NotRegistered { .. })
        ));
        rt.unregister_application("a").unwrap().await.unwrap();
        assert!(rt.app_names().is_empty());
    }

    #[tokio::test]
    async fn test_error_handlers_in_order() {
        let rt = Runtime::default();
        let calls = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let (c1, c2) = (Arc::clone(&calls), Arc::clone(&calls));
        let first = rt.add_error_handler(move |_e| c1.lock().push(1));
        rt.add_error_handler(move |_e| c2.lock().push(2));

        rt.register_application(
            Registration::with_loader("a", |_props: crate::units::Props| async {
                Err::<crate::units::UnitExports, _>(anyhow::anyhow!("x"))
            })
            .activity(Activity::always()),
        )
        .unwrap();
        rt.start().await.unwrap();
        assert_eq!(*calls.lock(), vec![1, 2]);

        assert!(rt.remove_error_handler(&first));
        assert!(!rt.remove_error_handler(&first));
    }

    #[tokio::test]
    async fn test_root_parcel_and_reset() {
        let rt = Runtime::default();
        let counters = Counters::default();
        let handle = rt.mount_root_parcel(counters.exports(), json!({})).unwrap();
        handle.mount_promise().await.unwrap();
        assert_eq!(rt.inner.root.children().len(), 1);

        rt.register_application(Registration::with_exports("a", ok_exports())).unwrap();
        rt.reset();

        assert!(rt.app_names().is_empty());
        assert!(rt.inner.root.children().is_empty());
        assert!(!rt.is_started());
        assert_eq!(rt.context(), ActivationContext::default());
    }
}
