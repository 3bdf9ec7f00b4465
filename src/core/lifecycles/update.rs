use std::sync::Arc;

use crate::core::Runtime;
use crate::core::handlers::transform_error;
use crate::core::timeout::run_phase;
use crate::error::{Fault, ParcelError};
use crate::units::unit::Unit;
use crate::units::{Phase, UnitStatus};

/// `mounted → updating → mounted`; parcels only.
///
/// Failures break the parcel and are always returned to the caller.
pub(crate) async fn update(rt: Runtime, unit: Arc<Unit>) -> Result<(), ParcelError> {
    if let Err(status) = rt.transition_from(&unit, &[UnitStatus::Mounted], UnitStatus::Updating) {
        return Err(ParcelError::NotUpdatable {
            name: unit.name().to_string(),
            status,
        });
    }

    match run_phase(&rt, &unit, Phase::Update).await {
        Ok(()) => {
            rt.transition(&unit, UnitStatus::Mounted);
            Ok(())
        }
        Err(e) => Err(transform_error(&rt, Fault::Phase(e), &unit, UnitStatus::Broken).into()),
    }
}
