//! # mountvisor
//!
//! **Mountvisor** orchestrates the lifecycle of independently loaded
//! application units inside one host process.
//!
//! Applications are registered with a loader and an activity predicate. On every
//! reroute the runtime evaluates the predicates against the ambient context and
//! drives each application through load, bootstrap, mount, unmount, and unload,
//! with per-phase timeouts, error isolation, and ordered events. Applications
//! (or the runtime itself) can also mount *parcels*: child units with an
//! explicit, imperative lifecycle.
//!
//! ## Architecture
//! ```text
//!   Registration        Registration        mount_root_parcel
//!        │                   │                     │
//!        ▼                   ▼                     ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Runtime                                                     │
//! │  - Registry (applications + unload records)                  │
//! │  - Reroute orchestrator (one cycle at a time, queued waiters)│
//! │  - Error handlers                                            │
//! │  - SubscriberSet (inline) + Bus (broadcast)                  │
//! └──────┬──────────────────────────────┬────────────────────────┘
//!        ▼                              ▼
//!   lifecycle steps                 parcels (owned by a unit)
//!   (supervised by timeouts)        load → bootstrap → mount
//! ```
//!
//! ### Unit status machine
//! ```text
//! not-loaded ─► loading-source ─┬─► not-bootstrapped ─► bootstrapping ─► not-mounted
//!     ▲                         └─► load-error (retried after a cooldown)
//!     │
//! unloading ◄── not-mounted ◄── unmounting ◄── mounted ◄── mounting ◄── not-mounted
//!                                               │  ▲
//!                                               ▼  │
//!                                             updating            (parcels only)
//!
//! any failure in a lifecycle call ─► broken (terminal)
//! ```
//!
//! ## Features
//! | Area              | Description                                                | Key types                                  |
//! |-------------------|------------------------------------------------------------|--------------------------------------------|
//! | **Runtime**       | Register, reroute, unload, reset.                          | [`Runtime`], [`RuntimeBuilder`]            |
//! | **Units**         | Loaders, lifecycle operations, activity predicates, props. | [`Registration`], [`UnitExports`], [`Activity`], [`Props`] |
//! | **Parcels**       | Imperatively mounted child units.                          | [`ParcelConfig`], [`ParcelHandle`]         |
//! | **Events**        | Routing, status, and timeout events.                       | [`Event`], [`EventKind`], [`Subscribe`]    |
//! | **Errors**        | Typed errors with a stable taxonomy.                       | [`UnitError`], [`ErrorKind`]               |
//! | **Configuration** | Per-phase timeouts and runtime settings.                   | [`RuntimeConfig`], [`TimeoutConfig`]       |
//!
//! ## Example
//! ```rust
//! use mountvisor::{Activity, Props, Registration, Runtime, RuntimeConfig, UnitExports};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let rt = Runtime::builder(RuntimeConfig::default())
//!         .with_error_handler(|err| eprintln!("{err}"))
//!         .build();
//!
//!     let exports = UnitExports::new()
//!         .mount(|props: Props| async move {
//!             println!("mounting {}", props.name());
//!             anyhow::Ok(())
//!         })
//!         .unmount(|_props: Props| async { anyhow::Ok(()) });
//!
//!     rt.register_application(
//!         Registration::with_exports("settings", exports)
//!             .activity(Activity::new(|ctx| ctx.as_str().starts_with("/settings"))),
//!     )?;
//!
//!     rt.trigger_reroute("/settings").await?;
//!     let mounted = rt.start().await?;
//!     assert_eq!(mounted, vec!["settings".to_string()]);
//!     Ok(())
//! }
//! ```
mod config;
mod core;
mod error;
mod events;
mod subscribers;
mod units;

#[cfg(test)]
mod test_support;

// ---- Public re-exports ----

pub use config::{
    DEFAULT_WARN_AFTER, PhaseTimeouts, RuntimeConfig, TimeoutConfig, TimeoutOverrides,
    UnhandledErrorPolicy,
};
pub use self::core::{
    ErrorHandler, ParcelConfig, ParcelHandle, RerouteHandle, Runtime, RuntimeBuilder,
    UnloadHandle, UnloadOptions,
};
pub use error::{
    ConfigError, ErrorKind, Fault, InvalidExports, ParcelError, PhaseError, RegistrationError,
    RerouteError, UnitError, UnloadError,
};
pub use events::{Bus, Event, EventKind, RoutingDetail};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
pub use units::{
    ActivationContext, Activity, BoxLifecycleFuture, BoxLoadFuture, CustomProps, Lifecycle,
    LifecycleFn, LifecycleOp, LifecycleRef, Lifecycles, Load, LoadFn, LoadRef, Phase, Props,
    Registration, UnitExports, UnitKind, UnitStatus,
};
