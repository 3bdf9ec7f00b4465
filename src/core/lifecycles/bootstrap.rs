use std::sync::Arc;

use crate::core::Runtime;
use crate::core::handlers::fail;
use crate::core::timeout::run_phase;
use crate::error::{Fault, UnitError};
use crate::units::unit::Unit;
use crate::units::{Phase, UnitStatus};

/// `not-bootstrapped → bootstrapping → not-mounted`.
pub(crate) async fn bootstrap(rt: Runtime, unit: Arc<Unit>, hard_fail: bool) -> Result<(), UnitError> {
    if rt
        .transition_from(&unit, &[UnitStatus::NotBootstrapped], UnitStatus::Bootstrapping)
        .is_err()
    {
        return Ok(());
    }

    match run_phase(&rt, &unit, Phase::Bootstrap).await {
        Ok(()) => {
            rt.transition(&unit, UnitStatus::NotMounted);
            Ok(())
        }
        Err(e) => fail(&rt, Fault::Phase(e), &unit, hard_fail),
    }
}
