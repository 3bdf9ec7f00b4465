//! # Error transformer and handler registry.
//!
//! Every lifecycle failure flows through [`transform_error`]: the raw [`Fault`]
//! becomes a [`UnitError`] whose message names the unit and the status it died
//! in, and the unit moves to the requested status (`broken` or `load-error`).
//!
//! ```text
//! Fault ──► transform_error ──► UnitError ──┬──► handlers (in registration order)
//!                 │                         └──► no handlers: UnhandledErrorPolicy
//!                 └──► Runtime::transition(new_status)
//! ```
//!
//! The message is built from the status *before* the transition.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::UnhandledErrorPolicy;
use crate::error::{Fault, UnitError};
use crate::units::UnitStatus;
use crate::units::unit::Unit;

use super::Runtime;

/// Callback receiving every reported [`UnitError`].
pub type ErrorHandler = Arc<dyn Fn(&UnitError) + Send + Sync>;

/// Ordered list of error handlers.
#[derive(Default)]
pub(crate) struct ErrorHandlers {
    list: RwLock<Vec<ErrorHandler>>,
}

impl ErrorHandlers {
    pub(crate) fn add(&self, handler: ErrorHandler) {
        self.list.write().push(handler);
    }

    /// Removes `handler` (by identity); returns whether it was registered.
    pub(crate) fn remove(&self, handler: &ErrorHandler) -> bool {
        let mut list = self.list.write();
        let before = list.len();
        list.retain(|h| !Arc::ptr_eq(h, handler));
        list.len() != before
    }

    pub(crate) fn clear(&self) {
        self.list.write().clear();
    }

    fn snapshot(&self) -> Vec<ErrorHandler> {
        self.list.read().clone()
    }
}

/// Builds the [`UnitError`] for `fault` and moves `unit` to `new_status`.
pub(crate) fn transform_error(
    rt: &Runtime,
    fault: Fault,
    unit: &Unit,
    new_status: UnitStatus,
) -> UnitError {
    transform_error_at(rt, fault, unit, unit.status(), new_status)
}

/// Like [`transform_error`], naming `prior_status` instead of the current one.
pub(crate) fn transform_error_at(
    rt: &Runtime,
    fault: Fault,
    unit: &Unit,
    prior_status: UnitStatus,
    new_status: UnitStatus,
) -> UnitError {
    let name = unit.name();
    let message = format!(
        "{} '{}' died in status {}: {}",
        unit.kind, name, prior_status, fault
    );
    let kind = fault.kind();
    let phase = fault.phase();
    let child = match fault {
        Fault::ChildUnmount(e) => Some(Box::new(e)),
        _ => None,
    };

    rt.transition(unit, new_status);

    UnitError {
        kind,
        unit_kind: unit.kind,
        unit_name: name,
        prior_status,
        phase,
        message,
        child,
    }
}

/// Transforms `fault` and reports it to every handler.
///
/// With no handlers installed the error is surfaced according to
/// [`UnhandledErrorPolicy`]: re-raised on a detached task, or logged.
pub(crate) fn handle_error(
    rt: &Runtime,
    fault: Fault,
    unit: &Unit,
    new_status: UnitStatus,
) -> UnitError {
    let err = transform_error(rt, fault, unit, new_status);
    dispatch(rt, &err);
    err
}

fn dispatch(rt: &Runtime, err: &UnitError) {
    let handlers = rt.inner.handlers.snapshot();
    if handlers.is_empty() {
        surface_unhandled(rt.unhandled_policy(), err);
    } else {
        for handler in handlers {
            handler(err);
        }
    }
}

/// Soft/hard split used by bootstrap, mount and unmount.
///
/// Hard: the transformed error is returned to the caller. Soft: it is handled
/// and the call resolves.
pub(crate) fn fail(
    rt: &Runtime,
    fault: Fault,
    unit: &Unit,
    hard_fail: bool,
) -> Result<(), UnitError> {
    fail_at(rt, fault, unit, unit.status(), hard_fail)
}

/// [`fail`] reporting `prior_status` as the status the unit died in.
pub(crate) fn fail_at(
    rt: &Runtime,
    fault: Fault,
    unit: &Unit,
    prior_status: UnitStatus,
    hard_fail: bool,
) -> Result<(), UnitError> {
    let err = transform_error_at(rt, fault, unit, prior_status, UnitStatus::Broken);
    if hard_fail {
        Err(err)
    } else {
        dispatch(rt, &err);
        Ok(())
    }
}

fn surface_unhandled(policy: UnhandledErrorPolicy, err: &UnitError) {
    tracing::error!(
        unit = %err.unit_name,
        kind = err.as_label(),
        status = %err.prior_status,
        "unhandled unit error: {}",
        err.message
    );
    if policy == UnhandledErrorPolicy::Panic {
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let err = err.clone();
            handle.spawn(async move { panic!("{err}") });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::error::{ErrorKind, PhaseError};
    use crate::units::Phase;
    use crate::test_support::{error_sink, loaded_app};

    #[tokio::test]
    async fn test_message_uses_prior_status() {
        let rt = Runtime::new(RuntimeConfig::default());
        let errors = error_sink(&rt);
        let unit = loaded_app(&rt, "nav", UnitStatus::Mounting);

        let fault = Fault::Phase(PhaseError::Rejected {
            phase: Phase::Mount,
            message: "boom".into(),
        });
        let err = handle_error(&rt, fault, &unit, UnitStatus::Broken);

        assert_eq!(
            err.message,
            "application 'nav' died in status mounting: mount rejected: boom"
        );
        assert_eq!(err.kind, ErrorKind::Lifecycle);
        assert_eq!(err.phase, Some(Phase::Mount));
        assert_eq!(unit.status(), UnitStatus::Broken);
        assert_eq!(errors.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_handler_by_identity() {
        let rt = Runtime::new(RuntimeConfig::default());
        let h: ErrorHandler = Arc::new(|_e: &UnitError| {});
        rt.inner.handlers.add(Arc::clone(&h));
        assert!(rt.inner.handlers.remove(&h));
        assert!(!rt.inner.handlers.remove(&h));
    }

    #[tokio::test]
    async fn test_fail_soft_resolves() {
        let rt = Runtime::new(RuntimeConfig::default());
        let errors = error_sink(&rt);
        let unit = loaded_app(&rt, "nav", UnitStatus::Bootstrapping);
        let fault = Fault::Phase(PhaseError::Rejected {
            phase: Phase::Bootstrap,
            message: "x".into(),
        });

        assert!(fail(&rt, fault, &unit, false).is_ok());
        assert_eq!(unit.status(), UnitStatus::Broken);
        assert_eq!(errors.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_fail_hard_skips_handlers() {
        let rt = Runtime::new(RuntimeConfig::default());
        let errors = error_sink(&rt);
        let unit = loaded_app(&rt, "nav", UnitStatus::Bootstrapping);
        let fault = Fault::Phase(PhaseError::Rejected {
            phase: Phase::Bootstrap,
            message: "x".into(),
        });

        let err = fail(&rt, fault, &unit, true).unwrap_err();
        assert_eq!(err.prior_status, UnitStatus::Bootstrapping);
        assert!(errors.lock().is_empty());
    }
}
