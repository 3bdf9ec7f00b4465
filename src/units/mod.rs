//! Unit data model: statuses, activation, lifecycle exports, props and registration.
//!
//! ## Contents
//! - [`UnitStatus`], [`UnitKind`], [`Phase`] status graph and phase names
//! - [`Activity`], [`ActivationContext`] activation predicates
//! - [`UnitExports`], [`LifecycleOp`], [`Load`] what user code supplies
//! - [`Props`], [`CustomProps`] what lifecycle calls receive
//! - [`Registration`] normalized application description

mod activity;
mod lifecycle;
pub(crate) mod props;
mod registration;
mod status;
pub(crate) mod unit;

pub use activity::{ActivationContext, Activity};
pub use lifecycle::{
    BoxLifecycleFuture, BoxLoadFuture, Lifecycle, LifecycleFn, LifecycleOp, LifecycleRef,
    Lifecycles, Load, LoadFn, LoadRef, UnitExports,
};
pub use props::{CustomProps, Props};
pub use registration::Registration;
pub use status::{Phase, UnitKind, UnitStatus};

pub(crate) use lifecycle::{Ready, panic_message};
