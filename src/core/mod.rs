//! Runtime core: orchestration and lifecycle.
//!
//! The public API from this module is [`Runtime`] (with [`RuntimeBuilder`])
//! and the handles its operations return.
//!
//! Internal modules:
//! - [`runtime`]: the shared state and the public operations;
//! - [`registry`]: registered applications and pending-change classification;
//! - [`reroute`]: the serialized reroute cycle;
//! - [`lifecycles`]: per-unit load/bootstrap/mount/unmount/unload/update steps;
//! - [`timeout`]: warning and hard-timeout supervision of one lifecycle call;
//! - [`handlers`]: error transformation and handler dispatch;
//! - [`parcel`]: parcels and their handles.

mod builder;
mod handlers;
mod lifecycles;
pub(crate) mod parcel;
mod registry;
mod reroute;
mod runtime;
mod timeout;

pub use builder::RuntimeBuilder;
pub use handlers::ErrorHandler;
pub use lifecycles::{UnloadHandle, UnloadOptions};
pub use parcel::{ParcelConfig, ParcelHandle};
pub use reroute::RerouteHandle;
pub use runtime::Runtime;
