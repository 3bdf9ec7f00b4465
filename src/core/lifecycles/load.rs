use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use futures::FutureExt;
use tokio::time::Instant;

use crate::core::Runtime;
use crate::core::handlers::handle_error;
use crate::error::Fault;
use crate::units::unit::Unit;
use crate::units::{Lifecycles, LoadRef, Props, UnitExports, UnitStatus, panic_message};

/// Loads `unit`'s exports.
///
/// Concurrent callers share one in-flight load. Failures are always handled
/// (never returned): a rejected loader leaves the unit in `load-error` for a
/// later retry, a contract violation breaks it.
pub(crate) async fn load(rt: Runtime, unit: Arc<Unit>) {
    let marker = {
        let mut st = unit.state.lock();
        if let Some(marker) = st.loading.clone() {
            marker
        } else {
            if !matches!(st.status, UnitStatus::NotLoaded | UnitStatus::LoadError) {
                return;
            }
            let marker = run_load(rt, Arc::clone(&unit)).boxed().shared();
            st.loading = Some(marker.clone());
            marker
        }
    };
    marker.await;
}

async fn run_load(rt: Runtime, unit: Arc<Unit>) {
    let Some(loader) = unit.loader.clone() else {
        unit.state.lock().loading = None;
        return;
    };
    rt.transition(&unit, UnitStatus::LoadingSource);

    let outcome = call_loader(&rt, &unit, loader).await;

    unit.state.lock().loading = None;

    match outcome {
        Ok((exports, lifecycles)) => {
            let timeouts = rt
                .config()
                .timeouts
                .merged(&unit.overrides)
                .merged(exports.timeouts());
            {
                let mut st = unit.state.lock();
                st.load_error_at = None;
                st.lifecycles = Some(lifecycles);
                st.timeouts = timeouts;
            }
            rt.transition(&unit, UnitStatus::NotBootstrapped);
            tracing::debug!(unit = %unit.name(), "loaded");
        }
        Err(fault @ Fault::Load(_)) => {
            unit.state.lock().load_error_at = Some(Instant::now());
            handle_error(&rt, fault, &unit, UnitStatus::LoadError);
        }
        Err(fault) => {
            unit.state.lock().load_error_at = None;
            handle_error(&rt, fault, &unit, UnitStatus::Broken);
        }
    }
}

async fn call_loader(
    rt: &Runtime,
    unit: &Arc<Unit>,
    loader: LoadRef,
) -> Result<(UnitExports, Lifecycles), Fault> {
    let props = Props::for_unit(rt, unit);
    let fut = catch_unwind(AssertUnwindSafe(|| loader.load(props)))
        .map_err(|payload| Fault::LoaderPanicked(panic_message(payload.as_ref())))?;

    let exports = match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(exports)) => exports,
        Ok(Err(e)) => return Err(Fault::Load(e)),
        Err(payload) => {
            return Err(Fault::Load(anyhow::anyhow!(
                "loading function panicked: {}",
                panic_message(payload.as_ref())
            )));
        }
    };
    let lifecycles = exports.validate().map_err(Fault::InvalidExports)?;
    Ok((exports, lifecycles))
}
