use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, join_all};

use crate::core::Runtime;
use crate::core::handlers::fail;
use crate::core::parcel::unmount_this_parcel;
use crate::core::timeout::run_phase;
use crate::error::{Fault, UnitError};
use crate::units::unit::Unit;
use crate::units::{Phase, UnitStatus};

/// `mounted → unmounting → not-mounted`, children first.
pub(crate) fn unmount(rt: Runtime, unit: Arc<Unit>, hard_fail: bool) -> BoxFuture<'static, Result<(), UnitError>> {
    unmount_with(rt, unit, hard_fail, true)
}

/// Unmount; with `settle == false` a successful run leaves the unit in
/// `unmounting` for the caller to finish (mount cleanup).
pub(crate) fn unmount_with(
    rt: Runtime,
    unit: Arc<Unit>,
    hard_fail: bool,
    settle: bool,
) -> BoxFuture<'static, Result<(), UnitError>> {
    async move {
        if rt
            .transition_from(&unit, &[UnitStatus::Mounted], UnitStatus::Unmounting)
            .is_err()
        {
            return Ok(());
        }

        let children = unit.children();
        let results = join_all(
            children
                .into_iter()
                .map(|child| unmount_this_parcel(rt.clone(), child)),
        )
        .await;
        let child_err = results.into_iter().find_map(Result::err);

        // the unit's own unmount runs even when a child failed
        if let Err(e) = run_phase(&rt, &unit, Phase::Unmount).await {
            return fail(&rt, Fault::Phase(e), &unit, hard_fail);
        }
        if let Some(child) = child_err {
            return fail(&rt, Fault::ChildUnmount(child), &unit, hard_fail);
        }
        if settle {
            rt.transition(&unit, UnitStatus::NotMounted);
        }
        Ok(())
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use crate::config::RuntimeConfig;
    use crate::error::ParcelError;
    use crate::test_support::{Counters, app_with, error_sink};
    use crate::units::{Props, UnitExports};

    #[tokio::test]
    async fn test_unmount_success() {
        let rt = Runtime::new(RuntimeConfig::default());
        let counters = Counters::default();
        let unit = app_with(&rt, "a", counters.exports(), UnitStatus::Mounted);

        unmount(rt.clone(), Arc::clone(&unit), true).await.unwrap();

        assert_eq!(unit.status(), UnitStatus::NotMounted);
        assert_eq!(counters.unmount.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unmount_skips_when_not_mounted() {
        let rt = Runtime::new(RuntimeConfig::default());
        let counters = Counters::default();
        let unit = app_with(&rt, "a", counters.exports(), UnitStatus::NotMounted);

        unmount(rt.clone(), Arc::clone(&unit), true).await.unwrap();
        assert_eq!(counters.unmount.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_child_failure_breaks_parent() {
        let rt = Runtime::new(RuntimeConfig::default());
        let errors = error_sink(&rt);
        let counters = Counters::default();
        let owner = app_with(&rt, "owner", counters.exports(), UnitStatus::Mounted);

        let child = UnitExports::new()
            .mount(|_props: Props| async { anyhow::Ok(()) })
            .unmount(|_props: Props| async { Err(anyhow::anyhow!("stuck")) });
        let handle = crate::core::parcel::mount_parcel(&rt, &owner, child.into(), serde_json::json!({})).unwrap();
        handle.mount_promise().await.unwrap();

        unmount(rt.clone(), Arc::clone(&owner), false).await.unwrap();

        // parent's own unmount still ran
        assert_eq!(counters.unmount.load(Ordering::SeqCst), 1);
        assert_eq!(owner.status(), UnitStatus::Broken);
        assert_eq!(handle.status(), UnitStatus::Broken);

        let errors = errors.lock();
        let parent = errors.iter().find(|e| &*e.unit_name == "owner").unwrap();
        assert!(matches!(parent.child.as_deref(), Some(ParcelError::Unit(_))));
    }
}
