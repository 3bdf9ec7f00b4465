//! Unload: returning a loaded unit to `not-loaded` so its loader runs again.
//!
//! An unload request is a record keyed by unit name. The record is settled
//! once, when the unit actually reaches `not-loaded` (or fails to); every
//! request made while it is pending shares it.
//!
//! ```text
//! unload_application(name, wait_for_unmount = true)
//!     └─► record only; the next cycle that deactivates the unit unloads it
//!
//! unload_application(name, wait_for_unmount = false)
//!     └─► unmount (soft) ─► unload ─► settle ─► trigger_app_change
//! ```

use std::future::IntoFuture;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::core::Runtime;
use crate::core::handlers::handle_error;
use crate::core::timeout::run_phase;
use crate::error::{Fault, UnloadError};
use crate::units::unit::Unit;
use crate::units::{Phase, UnitStatus};

use super::unmount::unmount;

type UnloadResult = Result<(), UnloadError>;

/// Pending unload record for one unit.
pub(crate) struct UnloadSlot {
    tx: Mutex<Option<oneshot::Sender<UnloadResult>>>,
    done: Shared<BoxFuture<'static, UnloadResult>>,
    immediate: AtomicBool,
}

impl UnloadSlot {
    pub(crate) fn new(name: Arc<str>) -> Arc<Self> {
        let (tx, rx) = oneshot::channel();
        let done = rx
            .map(move |res| {
                res.unwrap_or_else(|_| {
                    Err(UnloadError::Abandoned {
                        name: name.to_string(),
                    })
                })
            })
            .boxed()
            .shared();
        Arc::new(Self {
            tx: Mutex::new(Some(tx)),
            done,
            immediate: AtomicBool::new(false),
        })
    }

    /// Settles the record; later calls are ignored.
    pub(crate) fn settle(&self, res: UnloadResult) {
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(res);
        }
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.tx.lock().is_some()
    }

    /// Drops the sender; waiters observe [`UnloadError::Abandoned`].
    pub(crate) fn abandon(&self) {
        self.tx.lock().take();
    }

    /// True for the first caller only.
    fn claim_immediate(&self) -> bool {
        !self.immediate.swap(true, Ordering::SeqCst)
    }
}

/// Options for [`Runtime::unload_application`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UnloadOptions {
    /// Only record the request; unload once a later cycle unmounts the unit.
    pub wait_for_unmount: bool,
}

/// Completion of an unload request. Await it (it is [`IntoFuture`]).
#[derive(Clone)]
pub struct UnloadHandle {
    slot: Arc<UnloadSlot>,
}

impl UnloadHandle {
    /// True if both handles refer to the same pending record.
    pub fn same_request(&self, other: &UnloadHandle) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }

    /// Whether the request is still pending.
    pub fn is_pending(&self) -> bool {
        self.slot.is_pending()
    }
}

impl IntoFuture for UnloadHandle {
    type Output = UnloadResult;
    type IntoFuture = Shared<BoxFuture<'static, UnloadResult>>;

    fn into_future(self) -> Self::IntoFuture {
        self.slot.done.clone()
    }
}

impl std::fmt::Debug for UnloadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnloadHandle")
            .field("pending", &self.is_pending())
            .finish()
    }
}

/// Creates (or joins) the unload record for `unit`, starting the immediate
/// path unless the caller waits for a natural unmount.
pub(crate) fn request_unload(rt: &Runtime, unit: Arc<Unit>, opts: UnloadOptions) -> UnloadHandle {
    let slot = rt.inner.registry.unload_slot_or_insert(unit.name());
    if !opts.wait_for_unmount && slot.claim_immediate() {
        tokio::spawn(unload_now(rt.clone(), unit, Arc::clone(&slot)));
    }
    UnloadHandle { slot }
}

async fn unload_now(rt: Runtime, unit: Arc<Unit>, slot: Arc<UnloadSlot>) {
    // soft unmount never returns an error
    let _ = unmount(rt.clone(), Arc::clone(&unit), false).await;
    unload(rt.clone(), Arc::clone(&unit)).await;

    if slot.is_pending() {
        rt.inner.registry.remove_unload(&unit.name(), &slot);
        slot.settle(Ok(()));
    }
    drop(rt.trigger_app_change());
}

/// `not-mounted | not-bootstrapped | load-error → unloading → not-loaded`.
///
/// Runs only while an unload record exists for the unit. The unit's
/// lifecycle operations are dropped whether or not the unload succeeds.
pub(crate) async fn unload(rt: Runtime, unit: Arc<Unit>) {
    let name = unit.name();
    let Some(slot) = rt.inner.registry.unload_slot(&name) else {
        return;
    };

    match unit.status() {
        UnitStatus::NotLoaded => {
            finish(&rt, &name, &slot, Ok(()));
            return;
        }
        UnitStatus::Unloading => {
            let _ = slot.done.clone().await;
            return;
        }
        _ => {}
    }

    let Ok(prior) = rt.transition_from(
        &unit,
        &[
            UnitStatus::NotMounted,
            UnitStatus::NotBootstrapped,
            UnitStatus::LoadError,
        ],
        UnitStatus::Unloading,
    ) else {
        return;
    };

    // a unit that never loaded has no unload function to call
    let res = if prior == UnitStatus::LoadError {
        Ok(())
    } else {
        run_phase(&rt, &unit, Phase::Unload).await
    };

    match res {
        Ok(()) => {
            let timeouts = rt.config().timeouts.merged(&unit.overrides);
            {
                let mut st = unit.state.lock();
                st.lifecycles = None;
                st.load_error_at = None;
                st.timeouts = timeouts;
            }
            rt.transition(&unit, UnitStatus::NotLoaded);
            finish(&rt, &name, &slot, Ok(()));
        }
        Err(e) => {
            unit.state.lock().lifecycles = None;
            let err = handle_error(&rt, Fault::Phase(e), &unit, UnitStatus::Broken);
            finish(&rt, &name, &slot, Err(err.into()));
        }
    }
}

fn finish(rt: &Runtime, name: &str, slot: &Arc<UnloadSlot>, res: UnloadResult) {
    rt.inner.registry.remove_unload(name, slot);
    slot.settle(res);
}
