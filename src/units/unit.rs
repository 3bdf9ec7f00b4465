//! # Internal unit record.
//!
//! One [`Unit`] per registered application, mounted parcel, and the runtime root.
//! Everything mutable sits behind short `parking_lot` critical sections; no guard
//! is ever held across an `.await`.
//!
//! Status is only changed through `core::Runtime::transition` (which also
//! publishes `status-changed`), never written here directly by callers.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock, Weak};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::config::{PhaseTimeouts, TimeoutOverrides};
use crate::error::ParcelError;

use super::activity::Activity;
use super::lifecycle::{Lifecycles, LoadRef};
use super::props::CustomProps;
use super::status::{UnitKind, UnitStatus};

/// Shared, clonable result of one parcel phase.
pub(crate) type ParcelPhase = Shared<BoxFuture<'static, Result<(), ParcelError>>>;

/// Shared marker of an in-flight load.
pub(crate) type LoadMarker = Shared<BoxFuture<'static, ()>>;

pub(crate) struct UnitState {
    pub(crate) name: Arc<str>,
    pub(crate) status: UnitStatus,
    pub(crate) load_error_at: Option<Instant>,
    pub(crate) lifecycles: Option<Lifecycles>,
    pub(crate) timeouts: PhaseTimeouts,
    pub(crate) loading: Option<LoadMarker>,
}

/// Ownership link of a parcel to the unit that mounted it.
pub(crate) struct ParcelLink {
    pub(crate) id: u64,
    pub(crate) owner: Weak<Unit>,
    pub(crate) mounted: OnceLock<ParcelPhase>,
    unmount_tx: Mutex<Option<oneshot::Sender<Result<(), ParcelError>>>>,
    pub(crate) unmounted: ParcelPhase,
}

impl ParcelLink {
    fn new(id: u64, owner: Weak<Unit>, name: Arc<str>) -> Self {
        let (tx, rx) = oneshot::channel();
        let unmounted = rx
            .map(move |res| {
                res.unwrap_or_else(|_| {
                    Err(ParcelError::Abandoned {
                        name: name.to_string(),
                    })
                })
            })
            .boxed()
            .shared();
        Self {
            id,
            owner,
            mounted: OnceLock::new(),
            unmount_tx: Mutex::new(Some(tx)),
            unmounted,
        }
    }

    /// Settles the unmount promise (first call wins).
    pub(crate) fn settle_unmount(&self, res: Result<(), ParcelError>) {
        if let Some(tx) = self.unmount_tx.lock().take() {
            let _ = tx.send(res);
        }
    }
}

pub(crate) struct Unit {
    pub(crate) kind: UnitKind,
    pub(crate) activity: Option<Activity>,
    pub(crate) loader: Option<LoadRef>,
    pub(crate) overrides: TimeoutOverrides,
    pub(crate) custom: Mutex<CustomProps>,
    pub(crate) state: Mutex<UnitState>,
    pub(crate) parcels: Mutex<BTreeMap<u64, Arc<Unit>>>,
    pub(crate) link: Option<ParcelLink>,
}

impl Unit {
    /// A freshly registered application (`not-loaded`).
    pub(crate) fn application(
        name: Arc<str>,
        loader: LoadRef,
        activity: Activity,
        custom: CustomProps,
        overrides: TimeoutOverrides,
        timeouts: PhaseTimeouts,
    ) -> Self {
        Self {
            kind: UnitKind::Application,
            activity: Some(activity),
            loader: Some(loader),
            overrides,
            custom: Mutex::new(custom),
            state: Mutex::new(UnitState::new(name, UnitStatus::NotLoaded, timeouts)),
            parcels: Mutex::new(BTreeMap::new()),
            link: None,
        }
    }

    /// A parcel owned by `owner`; `status` is `not-bootstrapped` or `loading-source`.
    pub(crate) fn parcel(
        id: u64,
        name: Arc<str>,
        owner: &Arc<Unit>,
        custom: CustomProps,
        status: UnitStatus,
        timeouts: PhaseTimeouts,
    ) -> Self {
        Self {
            kind: UnitKind::Parcel,
            activity: None,
            loader: None,
            overrides: TimeoutOverrides::default(),
            custom: Mutex::new(custom),
            state: Mutex::new(UnitState::new(Arc::clone(&name), status, timeouts)),
            parcels: Mutex::new(BTreeMap::new()),
            link: Some(ParcelLink::new(id, Arc::downgrade(owner), name)),
        }
    }

    /// Runtime-level owner of root parcels.
    pub(crate) fn root() -> Self {
        Self {
            kind: UnitKind::Root,
            activity: None,
            loader: None,
            overrides: TimeoutOverrides::default(),
            custom: Mutex::new(CustomProps::default()),
            state: Mutex::new(UnitState::new(
                Arc::from("root"),
                UnitStatus::Mounted,
                PhaseTimeouts::default(),
            )),
            parcels: Mutex::new(BTreeMap::new()),
            link: None,
        }
    }

    pub(crate) fn name(&self) -> Arc<str> {
        Arc::clone(&self.state.lock().name)
    }

    pub(crate) fn status(&self) -> UnitStatus {
        self.state.lock().status
    }

    pub(crate) fn is_mounted(&self) -> bool {
        self.status() == UnitStatus::Mounted
    }

    pub(crate) fn lifecycles(&self) -> Option<Lifecycles> {
        self.state.lock().lifecycles.clone()
    }

    pub(crate) fn parcel_id(&self) -> Option<u64> {
        self.link.as_ref().map(|l| l.id)
    }

    /// Snapshot of the children currently attached to this unit.
    pub(crate) fn children(&self) -> Vec<Arc<Unit>> {
        self.parcels.lock().values().cloned().collect()
    }

    /// Attaches `child` to this unit's parcel map.
    pub(crate) fn attach(&self, id: u64, child: Arc<Unit>) {
        self.parcels.lock().insert(id, child);
    }

    /// Removes the parcel `id`; returns whether it was attached.
    pub(crate) fn detach(&self, id: u64) -> bool {
        self.parcels.lock().remove(&id).is_some()
    }
}

impl UnitState {
    fn new(name: Arc<str>, status: UnitStatus, timeouts: PhaseTimeouts) -> Self {
        Self {
            name,
            status,
            load_error_at: None,
            lifecycles: None,
            timeouts,
            loading: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::lifecycle::{Ready, UnitExports};

    fn app(name: &str) -> Arc<Unit> {
        Arc::new(Unit::application(
            Arc::from(name),
            Arc::new(Ready(UnitExports::new())),
            Activity::always(),
            CustomProps::default(),
            TimeoutOverrides::default(),
            PhaseTimeouts::default(),
        ))
    }

    #[test]
    fn test_application_starts_not_loaded() {
        let unit = app("nav");
        assert_eq!(unit.status(), UnitStatus::NotLoaded);
        assert_eq!(&*unit.name(), "nav");
        assert!(unit.parcel_id().is_none());
    }

    #[test]
    fn test_attach_detach() {
        let owner = app("owner");
        let child = Arc::new(Unit::parcel(
            7,
            Arc::from("parcel-7"),
            &owner,
            CustomProps::default(),
            UnitStatus::NotBootstrapped,
            PhaseTimeouts::default(),
        ));
        owner.attach(7, Arc::clone(&child));
        assert_eq!(owner.children().len(), 1);
        assert!(owner.detach(7));
        assert!(!owner.detach(7));
        assert_eq!(child.parcel_id(), Some(7));
    }

    #[tokio::test]
    async fn test_unmount_settles_once() {
        let owner = app("owner");
        let child = Unit::parcel(
            1,
            Arc::from("p"),
            &owner,
            CustomProps::default(),
            UnitStatus::NotBootstrapped,
            PhaseTimeouts::default(),
        );
        let link = child.link.as_ref().unwrap();
        link.settle_unmount(Ok(()));
        link.settle_unmount(Err(ParcelError::InvalidCustomProps));
        assert!(link.unmounted.clone().await.is_ok());
    }
}
