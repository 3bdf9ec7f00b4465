//! Shared helpers for unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::core::Runtime;
use crate::error::UnitError;
use crate::events::{Event, EventKind, RoutingDetail};
use crate::subscribers::Subscribe;
use crate::units::unit::Unit;
use crate::units::{LifecycleFn, LifecycleRef, Phase, Props, Registration, UnitExports, UnitStatus};

/// Subscriber keeping every event it sees.
#[derive(Default)]
pub(crate) struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    pub(crate) fn install(rt: &Runtime) -> Arc<Self> {
        let rec = Arc::new(Self::default());
        rt.add_subscriber(rec.clone());
        rec
    }

    pub(crate) fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().iter().map(|e| e.kind).collect()
    }

    pub(crate) fn routing_kinds(&self) -> Vec<EventKind> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.is_routing())
            .map(|e| e.kind)
            .collect()
    }

    /// Target statuses of `unit`, in order.
    pub(crate) fn transitions(&self, unit: &str) -> Vec<UnitStatus> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.kind == EventKind::StatusChanged && e.unit.as_deref() == Some(unit))
            .filter_map(|e| e.to)
            .collect()
    }

    pub(crate) fn last_detail(&self, kind: EventKind) -> Option<Arc<RoutingDetail>> {
        self.events
            .lock()
            .iter()
            .rev()
            .find(|e| e.kind == kind)
            .and_then(|e| e.detail.clone())
    }
}

impl Subscribe for Recorder {
    fn on_event(&self, event: &Event) {
        self.events.lock().push(event.clone());
    }
}

/// Installs a handler collecting every reported error.
pub(crate) fn error_sink(rt: &Runtime) -> Arc<Mutex<Vec<UnitError>>> {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    rt.add_error_handler(move |e| sink.lock().push(e.clone()));
    errors
}

/// Call counters for the four standard phases.
#[derive(Clone, Default)]
pub(crate) struct Counters {
    pub(crate) bootstrap: Arc<AtomicUsize>,
    pub(crate) mount: Arc<AtomicUsize>,
    pub(crate) unmount: Arc<AtomicUsize>,
    pub(crate) unload: Arc<AtomicUsize>,
}

impl Counters {
    /// Exports whose operations only count their calls.
    pub(crate) fn exports(&self) -> UnitExports {
        UnitExports::new()
            .with_op(Phase::Bootstrap, counting(&self.bootstrap))
            .with_op(Phase::Mount, counting(&self.mount))
            .with_op(Phase::Unmount, counting(&self.unmount))
            .with_op(Phase::Unload, counting(&self.unload))
    }
}

fn counting(counter: &Arc<AtomicUsize>) -> LifecycleRef {
    let counter = Arc::clone(counter);
    LifecycleFn::arc(move |_props: Props| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { anyhow::Ok(()) }
    })
}

pub(crate) fn ok_exports() -> UnitExports {
    Counters::default().exports()
}

/// Registers `reg` and returns its unit.
pub(crate) fn register(rt: &Runtime, reg: Registration) -> Arc<Unit> {
    let name = reg.name().to_string();
    rt.register_application(reg).unwrap();
    rt.inner.registry.find(&name).unwrap()
}

/// Registers an application already loaded with `exports`, sitting in `status`.
pub(crate) fn app_with(rt: &Runtime, name: &str, exports: UnitExports, status: UnitStatus) -> Arc<Unit> {
    let unit = register(rt, Registration::with_exports(name, exports.clone()));
    {
        let mut st = unit.state.lock();
        st.lifecycles = Some(exports.validate().unwrap());
        st.timeouts = rt.config().timeouts.merged(exports.timeouts());
        st.status = status;
    }
    unit
}

pub(crate) fn loaded_app(rt: &Runtime, name: &str, status: UnitStatus) -> Arc<Unit> {
    app_with(rt, name, ok_exports(), status)
}
