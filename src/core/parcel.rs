//! # Parcels: imperatively mounted child units.
//!
//! A parcel is mounted by an owner (an application, another parcel, or the
//! runtime root) and lives in the owner's parcel map until it unmounts.
//!
//! ```text
//! mount_parcel(config, props)
//!   ├─ validate props, allocate id, attach to owner      (synchronous)
//!   └─ load ──► bootstrap(hard) ──► mount(hard)           (shared phases)
//!
//! owner unmount ──► unmount_this_parcel(child) ─► unmount(hard) ─► detach
//! ```
//!
//! ## Rules
//! - Ids come from one process-wide counter and are never reused.
//! - The default name is `parcel-{id}`.
//! - Each phase future is shared: awaiting it from several places runs it once.
//! - The unmount promise settles exactly once, on the first unmount attempt.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::ParcelError;
use crate::units::unit::{ParcelPhase, Unit};
use crate::units::{BoxLoadFuture, CustomProps, UnitExports, UnitStatus, panic_message};

use super::{Runtime, lifecycles};

static PARCEL_COUNTER: AtomicU64 = AtomicU64::new(0);

/// How a parcel's exports are provided.
pub enum ParcelConfig {
    /// Exports available now; validated synchronously.
    Ready(UnitExports),
    /// Exports resolved asynchronously before bootstrap.
    Deferred(BoxLoadFuture),
}

impl ParcelConfig {
    pub fn deferred<F>(fut: F) -> Self
    where
        F: Future<Output = anyhow::Result<UnitExports>> + Send + 'static,
    {
        ParcelConfig::Deferred(fut.boxed())
    }
}

impl From<UnitExports> for ParcelConfig {
    fn from(exports: UnitExports) -> Self {
        ParcelConfig::Ready(exports)
    }
}

impl fmt::Debug for ParcelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParcelConfig::Ready(e) => f.debug_tuple("Ready").field(e).finish(),
            ParcelConfig::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// Creates a parcel owned by `owner` and starts bootstrapping and mounting it.
///
/// # Panics
/// Must be called from within a Tokio runtime (the mount is spawned).
pub(crate) fn mount_parcel(
    rt: &Runtime,
    owner: &Arc<Unit>,
    config: ParcelConfig,
    custom: Value,
) -> Result<ParcelHandle, ParcelError> {
    if !custom.is_object() {
        return Err(ParcelError::InvalidCustomProps);
    }
    let id = PARCEL_COUNTER.fetch_add(1, Ordering::Relaxed);
    let defaults = rt.config().timeouts;

    let (unit, deferred) = match config {
        ParcelConfig::Ready(exports) => {
            let name = exports
                .name()
                .map_or_else(|| format!("parcel-{id}"), str::to_owned);
            let lifecycles = exports
                .validate()
                .map_err(|source| ParcelError::InvalidConfig {
                    name: name.clone(),
                    source,
                })?;
            let unit = Unit::parcel(
                id,
                Arc::from(name),
                owner,
                CustomProps::Static(custom),
                UnitStatus::NotBootstrapped,
                defaults.merged(exports.timeouts()),
            );
            unit.state.lock().lifecycles = Some(lifecycles);
            (Arc::new(unit), None)
        }
        ParcelConfig::Deferred(fut) => {
            let unit = Unit::parcel(
                id,
                Arc::from(format!("parcel-{id}")),
                owner,
                CustomProps::Static(custom),
                UnitStatus::LoadingSource,
                defaults,
            );
            (Arc::new(unit), Some(fut))
        }
    };
    owner.attach(id, Arc::clone(&unit));
    tracing::debug!(parcel = %unit.name(), owner = %owner.name(), id, "parcel created");

    let load: ParcelPhase = {
        let (rt, unit) = (rt.clone(), Arc::clone(&unit));
        async move {
            match deferred {
                Some(fut) => resolve_config(&rt, &unit, fut).await,
                None => Ok(()),
            }
        }
        .boxed()
        .shared()
    };
    let bootstrap: ParcelPhase = {
        let (rt, unit, load) = (rt.clone(), Arc::clone(&unit), load.clone());
        async move {
            load.await?;
            lifecycles::bootstrap(rt, unit, true)
                .await
                .map_err(ParcelError::from)
        }
        .boxed()
        .shared()
    };
    let mount: ParcelPhase = {
        let (rt, unit, bootstrap) = (rt.clone(), Arc::clone(&unit), bootstrap.clone());
        async move {
            bootstrap.await?;
            lifecycles::mount(rt, unit, true)
                .await
                .map_err(ParcelError::from)
        }
        .boxed()
        .shared()
    };

    if let Some(link) = &unit.link {
        let _ = link.mounted.set(mount.clone());
    }
    tokio::spawn(mount.clone().map(|_| ()));

    Ok(ParcelHandle {
        runtime: rt.clone(),
        unit,
        load,
        bootstrap,
        mount,
    })
}

async fn resolve_config(rt: &Runtime, unit: &Arc<Unit>, fut: BoxLoadFuture) -> Result<(), ParcelError> {
    let outcome = match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(exports)) => exports
            .validate()
            .map(|lifecycles| (exports, lifecycles))
            .map_err(|source| ParcelError::InvalidConfig {
                name: unit.name().to_string(),
                source,
            }),
        Ok(Err(e)) => Err(ParcelError::LoadFailed {
            name: unit.name().to_string(),
            message: format!("{e:#}"),
        }),
        Err(payload) => Err(ParcelError::LoadFailed {
            name: unit.name().to_string(),
            message: panic_message(payload.as_ref()),
        }),
    };

    match outcome {
        Ok((exports, lifecycles)) => {
            let timeouts = rt.config().timeouts.merged(exports.timeouts());
            {
                let mut st = unit.state.lock();
                if let Some(name) = exports.name() {
                    st.name = Arc::from(name);
                }
                st.lifecycles = Some(lifecycles);
                st.timeouts = timeouts;
            }
            rt.transition(unit, UnitStatus::NotBootstrapped);
            Ok(())
        }
        Err(e) => {
            tracing::warn!(parcel = %unit.name(), error = %e, "parcel config failed to load");
            rt.transition(unit, UnitStatus::Broken);
            Err(e)
        }
    }
}

/// Unmounts a parcel after its mount settles, then detaches it from its owner.
///
/// A failed unmount breaks the parcel; either way the parcel's unmount promise
/// is settled with the outcome.
pub(crate) fn unmount_this_parcel(rt: Runtime, unit: Arc<Unit>) -> BoxFuture<'static, Result<(), ParcelError>> {
    async move {
        let Some(link) = unit.link.as_ref() else {
            return Ok(());
        };
        if let Some(mounted) = link.mounted.get().cloned() {
            mounted.await?;
        }

        let status = unit.status();
        if status != UnitStatus::Mounted {
            return Err(ParcelError::NotUnmountable {
                name: unit.name().to_string(),
                status,
            });
        }

        match lifecycles::unmount(rt.clone(), Arc::clone(&unit), true).await {
            Ok(()) => {
                if let Some(owner) = link.owner.upgrade() {
                    owner.detach(link.id);
                }
                link.settle_unmount(Ok(()));
                Ok(())
            }
            Err(e) => {
                rt.transition(&unit, UnitStatus::Broken);
                let err = ParcelError::from(e);
                link.settle_unmount(Err(err.clone()));
                Err(err)
            }
        }
    }
    .boxed()
}

/// Handle to a mounted parcel.
#[derive(Clone)]
pub struct ParcelHandle {
    runtime: Runtime,
    unit: Arc<Unit>,
    load: ParcelPhase,
    bootstrap: ParcelPhase,
    mount: ParcelPhase,
}

impl ParcelHandle {
    /// Process-wide unique parcel id.
    pub fn id(&self) -> u64 {
        self.unit.parcel_id().unwrap_or_default()
    }

    pub fn name(&self) -> String {
        self.unit.name().to_string()
    }

    pub fn status(&self) -> UnitStatus {
        self.unit.status()
    }

    /// Re-mounts a parcel that was unmounted through this handle.
    pub async fn mount(&self) -> Result<(), ParcelError> {
        let status = self.unit.status();
        if status != UnitStatus::NotMounted {
            return Err(ParcelError::NotMountable {
                name: self.name(),
                status,
            });
        }
        if let Some(link) = &self.unit.link {
            if let Some(owner) = link.owner.upgrade() {
                owner.attach(link.id, Arc::clone(&self.unit));
            }
        }
        lifecycles::mount(self.runtime.clone(), Arc::clone(&self.unit), false).await?;
        Ok(())
    }

    /// Unmounts the parcel and detaches it from its owner.
    pub async fn unmount(&self) -> Result<(), ParcelError> {
        unmount_this_parcel(self.runtime.clone(), Arc::clone(&self.unit)).await
    }

    /// Whether the parcel's exports include an update operation.
    ///
    /// `false` until the exports are known.
    pub fn supports_update(&self) -> bool {
        self.unit.lifecycles().is_some_and(|l| l.has_update())
    }

    /// Replaces the parcel's custom props and runs its update operation.
    pub async fn update(&self, custom: Value) -> Result<(), ParcelError> {
        self.load.clone().await?;
        if !self.supports_update() {
            return Err(ParcelError::UpdateUnsupported { name: self.name() });
        }
        if !custom.is_object() {
            return Err(ParcelError::InvalidCustomProps);
        }
        *self.unit.custom.lock() = CustomProps::Static(custom);
        lifecycles::update(self.runtime.clone(), Arc::clone(&self.unit)).await
    }

    pub fn load_promise(&self) -> impl Future<Output = Result<(), ParcelError>> + Send + 'static {
        self.load.clone()
    }

    pub fn bootstrap_promise(&self) -> impl Future<Output = Result<(), ParcelError>> + Send + 'static {
        self.bootstrap.clone()
    }

    pub fn mount_promise(&self) -> impl Future<Output = Result<(), ParcelError>> + Send + 'static {
        self.mount.clone()
    }

    /// Settles once, with the outcome of the first unmount.
    pub fn unmount_promise(&self) -> impl Future<Output = Result<(), ParcelError>> + Send + 'static {
        let unmounted = self.unit.link.as_ref().map(|l| l.unmounted.clone());
        async move {
            match unmounted {
                Some(f) => f.await,
                None => Ok(()),
            }
        }
    }
}

impl fmt::Debug for ParcelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParcelHandle")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use serde_json::json;

    use crate::config::RuntimeConfig;
    use crate::test_support::{Counters, app_with, error_sink};
    use crate::units::{Phase, Props};

    fn owner(rt: &Runtime) -> (Arc<Unit>, Counters) {
        let counters = Counters::default();
        let unit = app_with(rt, "owner", counters.exports(), UnitStatus::Mounted);
        (unit, counters)
    }

    #[tokio::test]
    async fn test_mount_then_unmount() {
        let rt = Runtime::new(RuntimeConfig::default());
        let (owner, _) = owner(&rt);
        let counters = Counters::default();

        let handle = mount_parcel(&rt, &owner, counters.exports().into(), json!({"k": 1})).unwrap();
        assert_eq!(owner.children().len(), 1);
        assert!(handle.name().starts_with("parcel-"));

        handle.mount_promise().await.unwrap();
        assert_eq!(handle.status(), UnitStatus::Mounted);
        assert_eq!(counters.mount.load(Ordering::SeqCst), 1);

        handle.unmount().await.unwrap();
        assert_eq!(handle.status(), UnitStatus::NotMounted);
        assert!(owner.children().is_empty());
        assert!(handle.unmount_promise().await.is_ok());
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let rt = Runtime::new(RuntimeConfig::default());
        let (owner, _) = owner(&rt);
        let a = mount_parcel(&rt, &owner, Counters::default().exports().into(), json!({})).unwrap();
        let b = mount_parcel(&rt, &owner, Counters::default().exports().into(), json!({})).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn test_invalid_config_is_synchronous() {
        let rt = Runtime::new(RuntimeConfig::default());
        let (owner, _) = owner(&rt);
        let exports = UnitExports::new().with_name("bad").mount(|_props: Props| async { anyhow::Ok(()) });

        let err = mount_parcel(&rt, &owner, exports.into(), json!({})).unwrap_err();
        assert!(matches!(err, ParcelError::InvalidConfig { ref name, .. } if name == "bad"));
        assert!(owner.children().is_empty());

        let err = mount_parcel(&rt, &owner, Counters::default().exports().into(), json!(3)).unwrap_err();
        assert!(matches!(err, ParcelError::InvalidCustomProps));
    }

    #[tokio::test]
    async fn test_unmount_twice_fails() {
        let rt = Runtime::new(RuntimeConfig::default());
        let (owner, _) = owner(&rt);
        let handle = mount_parcel(&rt, &owner, Counters::default().exports().into(), json!({})).unwrap();

        handle.unmount().await.unwrap();
        let err = handle.unmount().await.unwrap_err();
        assert!(matches!(err, ParcelError::NotUnmountable { status: UnitStatus::NotMounted, .. }));
    }

    #[tokio::test]
    async fn test_remount_through_handle() {
        let rt = Runtime::new(RuntimeConfig::default());
        let (owner, _) = owner(&rt);
        let counters = Counters::default();
        let handle = mount_parcel(&rt, &owner, counters.exports().into(), json!({})).unwrap();
        handle.unmount().await.unwrap();

        handle.mount().await.unwrap();
        assert_eq!(handle.status(), UnitStatus::Mounted);
        assert_eq!(owner.children().len(), 1);
        assert_eq!(counters.mount.load(Ordering::SeqCst), 2);

        let err = handle.mount().await.unwrap_err();
        assert!(matches!(err, ParcelError::NotMountable { .. }));
    }

    #[tokio::test]
    async fn test_update() {
        let rt = Runtime::new(RuntimeConfig::default());
        let (owner, _) = owner(&rt);
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let exports = Counters::default().exports().update(move |props: Props| {
            sink.lock().push(props.custom().clone());
            async { anyhow::Ok(()) }
        });
        let handle = mount_parcel(&rt, &owner, exports.into(), json!({"v": 1})).unwrap();
        assert!(handle.supports_update());

        handle.mount_promise().await.unwrap();
        handle.update(json!({"v": 2})).await.unwrap();

        assert_eq!(*seen.lock(), vec![json!({"v": 2})]);
        assert_eq!(handle.status(), UnitStatus::Mounted);
    }

    #[tokio::test]
    async fn test_update_without_op() {
        let rt = Runtime::new(RuntimeConfig::default());
        let (owner, _) = owner(&rt);
        let handle = mount_parcel(&rt, &owner, Counters::default().exports().into(), json!({})).unwrap();
        handle.mount_promise().await.unwrap();

        let err = handle.update(json!({})).await.unwrap_err();
        assert!(matches!(err, ParcelError::UpdateUnsupported { .. }));
    }

    #[tokio::test]
    async fn test_update_failure_breaks() {
        let rt = Runtime::new(RuntimeConfig::default());
        let (owner, _) = owner(&rt);
        let exports = Counters::default()
            .exports()
            .update(|_props: Props| async { Err(anyhow::anyhow!("nope")) });
        let handle = mount_parcel(&rt, &owner, exports.into(), json!({})).unwrap();
        handle.mount_promise().await.unwrap();

        let err = handle.update(json!({})).await.unwrap_err();
        match err {
            ParcelError::Unit(e) => assert_eq!(e.phase, Some(Phase::Update)),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(handle.status(), UnitStatus::Broken);
    }

    #[tokio::test]
    async fn test_deferred_config() {
        let rt = Runtime::new(RuntimeConfig::default());
        let (owner, _) = owner(&rt);
        let counters = Counters::default();
        let exports = counters.exports().with_name("widget");
        let config = ParcelConfig::deferred(async move { anyhow::Ok(exports) });

        let handle = mount_parcel(&rt, &owner, config, json!({})).unwrap();
        handle.mount_promise().await.unwrap();

        assert_eq!(handle.name(), "widget");
        assert_eq!(handle.status(), UnitStatus::Mounted);
    }

    #[tokio::test]
    async fn test_deferred_failure_breaks() {
        let rt = Runtime::new(RuntimeConfig::default());
        let _errors = error_sink(&rt);
        let (owner, _) = owner(&rt);
        let config = ParcelConfig::deferred(async { Err(anyhow::anyhow!("404")) });

        let handle = mount_parcel(&rt, &owner, config, json!({})).unwrap();
        let err = handle.mount_promise().await.unwrap_err();

        assert!(matches!(err, ParcelError::LoadFailed { .. }));
        assert_eq!(handle.status(), UnitStatus::Broken);
    }

    #[tokio::test]
    async fn test_unmount_self_from_props() {
        let rt = Runtime::new(RuntimeConfig::default());
        let (owner, _) = owner(&rt);
        let slot = Arc::new(parking_lot::Mutex::new(None));
        let keep = Arc::clone(&slot);
        let exports = Counters::default().exports().with_ops(Phase::Mount, Vec::new()).mount(move |props: Props| {
            *keep.lock() = Some(props);
            async { anyhow::Ok(()) }
        });
        let handle = mount_parcel(&rt, &owner, exports.into(), json!({})).unwrap();
        handle.mount_promise().await.unwrap();

        let props = slot.lock().take().unwrap();
        props.unmount_self().unwrap().await.unwrap();
        assert_eq!(handle.status(), UnitStatus::NotMounted);
        assert!(owner.children().is_empty());
    }
}
