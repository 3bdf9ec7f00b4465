//! Runtime events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to notifications emitted by the reroute orchestrator,
//! the lifecycle state machine and the timeout supervisor.
//!
//! ## Contents
//! - [`EventKind`], [`Event`], [`RoutingDetail`] event classification and payload
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `core::reroute` (routing checkpoints), `core::lifecycles`
//!   (status changes, first-mount milestones), `core::timeout` (warnings, hits).
//! - **Consumers**: the runtime's `SubscriberSet` (inline, may cancel) and any
//!   `Bus` receiver obtained through `Runtime::subscribe`.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind, RoutingDetail};
