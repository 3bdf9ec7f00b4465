//! # Reroute orchestrator.
//!
//! A reroute cycle brings every registered application in line with its
//! activity predicate for the current ambient context.
//!
//! ## Cycle (started runtime)
//! ```text
//! pending_changes(ctx)
//!   ├─► before-(no-)app-change        (predicted statuses)
//!   ├─► before-routing-event          (cancellable)
//!   │      └─ cancelled? ─► before-mount-routing-event ─► finish(cancelled)
//!   ├─► unmount_all: unmount + unload to_unmount, unload to_unload
//!   │      └─► before-mount-routing-event
//!   ├─► to_load:  load ─► bootstrap ─► wait(unmount_all) ─► mount
//!   ├─► to_mount:         bootstrap ─► wait(unmount_all) ─► mount
//!   └─► finish: (no-)app-change, routing-event ─► mounted names
//! ```
//!
//! Before `start`, a cycle only loads the units that should be active and
//! resolves with an empty list without publishing anything.
//!
//! ## Rules
//! - At most one cycle runs at a time. Requests made meanwhile are queued and
//!   all of them are answered by one follow-up cycle.
//! - No incoming unit is mounted before every outgoing unit settled.
//! - Activity is re-checked before bootstrap and again before mount.
//! - Lifecycle failures inside a cycle are handled (soft), never propagated.
//! - `reset` abandons the running cycle; the next driver starts only after the
//!   abandoned one has exited.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared, join_all};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::RerouteError;
use crate::events::{Event, EventKind, RoutingDetail};
use crate::units::unit::Unit;
use crate::units::{ActivationContext, UnitStatus, panic_message};

use super::Runtime;
use super::lifecycles;

type RerouteResult = Result<Vec<String>, RerouteError>;
type Waiter = oneshot::Sender<RerouteResult>;

/// Routing state shared by every cycle.
#[derive(Default)]
pub(crate) struct RoutingState {
    pub(crate) in_progress: bool,
    pub(crate) queue: Vec<Waiter>,
    /// Context requested by the most recent trigger.
    pub(crate) context: ActivationContext,
    /// Context of the last cycle that was not cancelled.
    pub(crate) routed: ActivationContext,
    pub(crate) started: bool,
    /// Bumped by every reset; a driver from an older generation is stale.
    generation: u64,
    /// Cancelled (and replaced) by every reset.
    abandon: CancellationToken,
    /// Held by the running driver for its whole lifetime.
    driver: Arc<tokio::sync::Mutex<()>>,
}

impl RoutingState {
    /// Forgets queued requests and abandons the running cycle.
    ///
    /// Queued waiters resolve as [`RerouteError::Interrupted`].
    pub(crate) fn interrupt(&mut self) {
        self.generation += 1;
        std::mem::take(&mut self.abandon).cancel();
        self.queue.clear();
        self.in_progress = false;
        self.started = false;
        self.context = ActivationContext::default();
        self.routed = ActivationContext::default();
    }
}

/// Identity of one driver task.
struct Driver {
    generation: u64,
    abandon: CancellationToken,
    lock: Arc<tokio::sync::Mutex<()>>,
}

/// Completion of one reroute request.
///
/// Resolves to the names of the mounted applications once the cycle that
/// answers this request finishes.
#[must_use = "a reroute handle does nothing unless awaited"]
pub struct RerouteHandle {
    rx: oneshot::Receiver<RerouteResult>,
}

impl Future for RerouteHandle {
    type Output = RerouteResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.unwrap_or_else(|_| Err(RerouteError::Interrupted)))
    }
}

impl std::fmt::Debug for RerouteHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RerouteHandle").finish_non_exhaustive()
    }
}

/// Requests a cycle, optionally switching the ambient context first.
pub(crate) fn trigger(rt: &Runtime, ctx: Option<ActivationContext>) -> RerouteHandle {
    let (tx, rx) = oneshot::channel();
    let run_now = {
        let mut st = rt.inner.routing.lock();
        if let Some(ctx) = ctx {
            st.context = ctx;
        }
        if st.in_progress {
            st.queue.push(tx);
            None
        } else {
            st.in_progress = true;
            let driver = Driver {
                generation: st.generation,
                abandon: st.abandon.clone(),
                lock: Arc::clone(&st.driver),
            };
            Some((tx, driver))
        }
    };
    if let Some((tx, driver)) = run_now {
        tokio::spawn(drive(rt.clone(), driver, vec![tx]));
    }
    RerouteHandle { rx }
}

/// Runs cycles until no request is queued.
///
/// A reset drops the running cycle and its waiters; the stale driver then
/// exits without touching the routing state.
async fn drive(rt: Runtime, driver: Driver, mut waiters: Vec<Waiter>) {
    let _running = tokio::select! {
        biased;
        _ = driver.abandon.cancelled() => return,
        guard = Arc::clone(&driver.lock).lock_owned() => guard,
    };

    loop {
        let res = tokio::select! {
            biased;
            _ = driver.abandon.cancelled() => {
                tracing::debug!(generation = driver.generation, "reroute cycle abandoned by reset");
                return;
            }
            res = AssertUnwindSafe(cycle(&rt)).catch_unwind() => res.unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                tracing::error!(%message, "reroute cycle panicked");
                Err(RerouteError::Orchestration { message })
            }),
        };

        for waiter in waiters.drain(..) {
            let _ = waiter.send(res.clone());
        }

        let next = {
            let mut st = rt.inner.routing.lock();
            if st.generation != driver.generation {
                return;
            }
            if st.queue.is_empty() {
                st.in_progress = false;
                None
            } else {
                Some(std::mem::take(&mut st.queue))
            }
        };
        match next {
            Some(queued) => waiters = queued,
            None => break,
        }
    }
}

async fn cycle(rt: &Runtime) -> RerouteResult {
    let (ctx, previous, started) = {
        let mut guard = rt.inner.routing.lock();
        let st = &mut *guard;
        let previous = std::mem::replace(&mut st.routed, st.context.clone());
        (st.context.clone(), previous, st.started)
    };
    let changes = rt.pending_changes(&ctx);

    if !started {
        join_all(
            changes
                .to_load
                .into_iter()
                .map(|unit| lifecycles::load(rt.clone(), unit)),
        )
        .await;
        return Ok(Vec::new());
    }

    let changed = changes.changed();
    tracing::debug!(
        context = %ctx,
        load = changes.to_load.len(),
        mount = changes.to_mount.len(),
        unmount = changes.to_unmount.len(),
        unload = changes.to_unload.len(),
        "reroute"
    );

    let mut predicted = RoutingDetail::new(previous.clone(), ctx.clone());
    for unit in changes.to_load.iter().chain(&changes.to_mount) {
        predicted.add(&unit.name(), UnitStatus::Mounted);
    }
    for unit in &changes.to_unload {
        predicted.add(&unit.name(), UnitStatus::NotLoaded);
    }
    for unit in &changes.to_unmount {
        predicted.add(&unit.name(), UnitStatus::NotMounted);
    }
    let predicted = Arc::new(predicted);

    let kind = if changed.is_empty() {
        EventKind::BeforeNoAppChange
    } else {
        EventKind::BeforeAppChange
    };
    rt.publish(Event::new(kind).with_detail(Arc::clone(&predicted)));

    let token = CancellationToken::new();
    rt.publish(
        Event::new(EventKind::BeforeRoutingEvent)
            .with_detail(Arc::clone(&predicted))
            .with_cancel(token.clone()),
    );

    if token.is_cancelled() {
        tracing::debug!(context = %ctx, "navigation cancelled");
        let cancelled = Arc::new(RoutingDetail {
            cancelled: true,
            ..(*predicted).clone()
        });
        rt.publish(Event::new(EventKind::BeforeMountRoutingEvent).with_detail(cancelled));
        rt.inner.routing.lock().routed = previous.clone();
        return Ok(finish(rt, &changed, previous, ctx, true));
    }

    let outgoing = unmount_all(
        rt.clone(),
        changes.to_unmount,
        changes.to_unload,
        Arc::clone(&predicted),
    );

    let incoming: Vec<BoxFuture<'static, ()>> = changes
        .to_load
        .into_iter()
        .map(|unit| {
            let (rt, gate) = (rt.clone(), outgoing.clone());
            async move {
                lifecycles::load(rt.clone(), Arc::clone(&unit)).await;
                bootstrap_and_mount(rt, unit, gate).await;
            }
            .boxed()
        })
        .chain(
            changes
                .to_mount
                .into_iter()
                .map(|unit| bootstrap_and_mount(rt.clone(), unit, outgoing.clone()).boxed()),
        )
        .collect();

    futures::join!(outgoing, join_all(incoming));

    Ok(finish(rt, &changed, previous, ctx, false))
}

/// Unmounts and unloads outgoing units; publishes before-mount-routing-event
/// once all of them settled.
fn unmount_all(
    rt: Runtime,
    to_unmount: Vec<Arc<Unit>>,
    to_unload: Vec<Arc<Unit>>,
    detail: Arc<RoutingDetail>,
) -> Shared<BoxFuture<'static, ()>> {
    async move {
        let unmounts = to_unmount.into_iter().map(|unit| {
            let rt = rt.clone();
            async move {
                let _ = lifecycles::unmount(rt.clone(), Arc::clone(&unit), false).await;
                lifecycles::unload(rt, unit).await;
            }
            .boxed()
        });
        let unloads = to_unload
            .into_iter()
            .map(|unit| lifecycles::unload(rt.clone(), unit).boxed());

        join_all(unmounts.chain(unloads)).await;
        rt.publish(Event::new(EventKind::BeforeMountRoutingEvent).with_detail(detail));
    }
    .boxed()
    .shared()
}

async fn bootstrap_and_mount(rt: Runtime, unit: Arc<Unit>, gate: Shared<BoxFuture<'static, ()>>) {
    if !rt.is_active_now(&unit) {
        gate.await;
        return;
    }
    let _ = lifecycles::bootstrap(rt.clone(), Arc::clone(&unit), false).await;
    gate.await;
    if rt.is_active_now(&unit) {
        let _ = lifecycles::mount(rt, unit, false).await;
    }
}

/// Publishes the closing events and returns the mounted application names.
fn finish(
    rt: &Runtime,
    changed: &[Arc<Unit>],
    previous: ActivationContext,
    ctx: ActivationContext,
    cancelled: bool,
) -> Vec<String> {
    let mut detail = RoutingDetail::new(previous, ctx);
    detail.cancelled = cancelled;
    for unit in changed {
        detail.add(&unit.name(), unit.status());
    }
    let detail = Arc::new(detail);

    let kind = if changed.is_empty() {
        EventKind::NoAppChange
    } else {
        EventKind::AppChange
    };
    rt.publish(Event::new(kind).with_detail(Arc::clone(&detail)));
    rt.publish(Event::new(EventKind::RoutingEvent).with_detail(detail));

    rt.mounted_apps()
}
