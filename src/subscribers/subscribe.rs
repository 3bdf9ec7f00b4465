//! # Core subscriber trait
//!
//! `Subscribe` is the extension point for plugging custom event handlers into the
//! runtime. Subscribers are called inline, in registration order, at the moment
//! an event is published; this is what lets a subscriber cancel a reroute cycle
//! from `before-routing-event`.
//!
//! ## Contract
//! - Implementations must be quick and must not block: the orchestrator waits for
//!   `on_event` to return. Hand slow work to a task or use a `Bus` receiver.
//! - A panicking subscriber is isolated and logged; other subscribers still run.
//!
//! ## Example
//! ```rust
//! use mountvisor::{Event, EventKind, Subscribe};
//!
//! struct Veto;
//!
//! impl Subscribe for Veto {
//!     fn on_event(&self, ev: &Event) {
//!         if ev.kind == EventKind::BeforeRoutingEvent {
//!             ev.cancel_navigation();
//!         }
//!     }
//!     fn name(&self) -> &'static str { "veto" }
//! }
//! ```

use crate::events::Event;

/// Contract for event subscribers.
pub trait Subscribe: Send + Sync + 'static {
    /// Handle a single event.
    fn on_event(&self, event: &Event);

    /// Human-readable name (for logs).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}
