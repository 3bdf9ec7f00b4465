use std::sync::Arc;

use crate::core::Runtime;
use crate::core::handlers::fail_at;
use crate::core::timeout::run_phase;
use crate::error::{Fault, UnitError};
use crate::units::unit::Unit;
use crate::units::{Phase, UnitStatus};

use super::unmount::unmount_with;

/// `not-mounted → mounting → mounted`.
///
/// A failed mount is cleaned up first: the unit is provisionally marked
/// `mounted` and force-unmounted (hard), then broken with the mount error.
pub(crate) async fn mount(rt: Runtime, unit: Arc<Unit>, hard_fail: bool) -> Result<(), UnitError> {
    if unit.status() != UnitStatus::NotMounted {
        return Ok(());
    }
    rt.mark_before_first_mount();
    if rt
        .transition_from(&unit, &[UnitStatus::NotMounted], UnitStatus::Mounting)
        .is_err()
    {
        return Ok(());
    }

    match run_phase(&rt, &unit, Phase::Mount).await {
        Ok(()) => {
            rt.transition(&unit, UnitStatus::Mounted);
            rt.mark_first_mount();
            Ok(())
        }
        Err(e) => {
            rt.transition(&unit, UnitStatus::Mounted);
            if let Err(cleanup) = unmount_with(rt.clone(), Arc::clone(&unit), true, false).await {
                tracing::debug!(unit = %unit.name(), error = %cleanup, "cleanup unmount failed");
            }
            // cleanup may already have broken the unit; report the mount failure
            fail_at(&rt, Fault::Phase(e), &unit, UnitStatus::Mounting, hard_fail)
        }
    }
}
