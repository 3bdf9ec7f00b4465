//! # SubscriberSet: inline fan-out over multiple subscribers
//!
//! [`SubscriberSet`] delivers each [`Event`] to every subscriber, in order,
//! before `emit` returns.
//!
//! ## What it guarantees
//! - Global order: every subscriber sees events in publish order.
//! - Panics inside subscribers are caught and logged (isolation).
//!
//! ## Diagram
//! ```text
//!    emit(&Event)
//!        ├──► S1.on_event()
//!        ├──► S2.on_event()   (panic caught, logged, next one still runs)
//!        └──► SN.on_event()
//! ```

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::events::Event;
use crate::units::panic_message;

use super::Subscribe;

/// Ordered list of subscribers called inline.
#[derive(Default)]
pub struct SubscriberSet {
    subs: RwLock<Vec<Arc<dyn Subscribe>>>,
}

impl SubscriberSet {
    #[must_use]
    pub fn new(subs: Vec<Arc<dyn Subscribe>>) -> Self {
        Self {
            subs: RwLock::new(subs),
        }
    }

    /// Appends a subscriber.
    pub fn add(&self, sub: Arc<dyn Subscribe>) {
        self.subs.write().push(sub);
    }

    /// Delivers one event to all subscribers.
    ///
    /// The list is snapshotted first, so a subscriber may add another one
    /// while handling an event.
    pub fn emit(&self, event: &Event) {
        let subs = self.subs.read().clone();
        for sub in subs {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| sub.on_event(event))) {
                tracing::error!(
                    subscriber = sub.name(),
                    event = event.kind.as_str(),
                    panic = %panic_message(payload.as_ref()),
                    "subscriber panicked"
                );
            }
        }
    }

    /// True if there are no subscribers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subs.read().is_empty()
    }

    /// Number of subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subs.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use parking_lot::Mutex;

    struct Boom;

    impl Subscribe for Boom {
        fn on_event(&self, _ev: &Event) {
            panic!("subscriber failure");
        }
    }

    #[derive(Default)]
    struct Seen(Mutex<Vec<EventKind>>);

    impl Subscribe for Seen {
        fn on_event(&self, ev: &Event) {
            self.0.lock().push(ev.kind);
        }
    }

    #[test]
    fn test_panic_is_isolated() {
        let seen = Arc::new(Seen::default());
        let set = SubscriberSet::new(vec![Arc::new(Boom) as Arc<dyn Subscribe>, seen.clone()]);

        set.emit(&Event::new(EventKind::AppChange));
        set.emit(&Event::new(EventKind::RoutingEvent));

        assert_eq!(
            *seen.0.lock(),
            vec![EventKind::AppChange, EventKind::RoutingEvent]
        );
        assert_eq!(set.len(), 2);
    }
}
