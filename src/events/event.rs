//! # Notifications emitted by the runtime.
//!
//! The [`EventKind`] enum classifies event types across two categories:
//! - **Routing events**: checkpoints of a reroute cycle (before/after changes,
//!   before routing, before the mount phase) and first-mount milestones
//! - **Unit events**: status transitions and timeout escalation of one unit
//!
//! The [`Event`] struct carries the optional metadata: unit name, transition,
//! timeout and the [`RoutingDetail`] payload of routing events.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Cancellation
//! `before-routing-event` carries a cancel token. A synchronous subscriber may call
//! [`Event::cancel_navigation`] while handling it; the cycle then short-circuits
//! before anything is unmounted.
//!
//! ## Example
//! ```rust
//! use mountvisor::{Event, EventKind, UnitStatus};
//!
//! let ev = Event::new(EventKind::StatusChanged)
//!     .with_unit("nav")
//!     .with_transition(UnitStatus::NotMounted, UnitStatus::Mounting);
//!
//! assert_eq!(ev.kind.as_str(), "status-changed");
//! assert_eq!(ev.unit.as_deref(), Some("nav"));
//! assert!(!ev.cancel_navigation());
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;

use crate::units::{ActivationContext, UnitStatus};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // === Routing events (before changes) ===
    /// Cycle starts and nothing will change.
    ///
    /// Sets: `detail` (predicted statuses)
    BeforeNoAppChange,

    /// Cycle starts and at least one unit will change.
    ///
    /// Sets: `detail` (predicted statuses)
    BeforeAppChange,

    /// Last checkpoint before unmounting; cancellable.
    ///
    /// Sets: `detail`, `cancel`
    BeforeRoutingEvent,

    /// Outgoing units finished unmounting/unloading (or the cycle was cancelled).
    ///
    /// Sets: `detail`
    BeforeMountRoutingEvent,

    // === Routing events (after changes) ===
    /// Cycle finished without changes.
    ///
    /// Sets: `detail` (actual statuses)
    NoAppChange,

    /// Cycle finished with changes.
    ///
    /// Sets: `detail` (actual statuses)
    AppChange,

    /// Cycle finished (always follows `NoAppChange`/`AppChange`).
    ///
    /// Sets: `detail`
    RoutingEvent,

    // === Milestones ===
    /// The first mount of this runtime is about to start (published once).
    BeforeFirstMount,

    /// The first mount of this runtime succeeded (published once).
    FirstMount,

    // === Unit events ===
    /// A unit changed status.
    ///
    /// Sets: `unit`, `from`, `to`
    StatusChanged,

    /// A lifecycle call is still unresolved after another `warn_after`.
    ///
    /// Sets: `unit`, `phase`, `timeout_ms`
    TimeoutWarning,

    /// A lifecycle call exceeded its configured duration.
    ///
    /// Sets: `unit`, `phase`, `timeout_ms`
    TimeoutHit,
}

impl EventKind {
    /// Stable event name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::BeforeNoAppChange => "before-no-app-change",
            EventKind::BeforeAppChange => "before-app-change",
            EventKind::BeforeRoutingEvent => "before-routing-event",
            EventKind::BeforeMountRoutingEvent => "before-mount-routing-event",
            EventKind::NoAppChange => "no-app-change",
            EventKind::AppChange => "app-change",
            EventKind::RoutingEvent => "routing-event",
            EventKind::BeforeFirstMount => "before-first-mount",
            EventKind::FirstMount => "first-mount",
            EventKind::StatusChanged => "status-changed",
            EventKind::TimeoutWarning => "timeout-warning",
            EventKind::TimeoutHit => "timeout-hit",
        }
    }
}

/// Payload of routing events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingDetail {
    /// Units affected by the cycle, in processing order.
    pub changed: Vec<String>,
    /// Status per affected unit (predicted before changes, actual after).
    pub new_statuses: BTreeMap<String, UnitStatus>,
    /// Affected unit names grouped by status.
    pub by_new_status: BTreeMap<UnitStatus, Vec<String>>,
    /// Number of affected units.
    pub total_changes: usize,
    /// Context of the previous cycle.
    pub previous_context: ActivationContext,
    /// Context of this cycle.
    pub new_context: ActivationContext,
    /// Whether the cycle was cancelled at the before-routing checkpoint.
    pub cancelled: bool,
}

impl RoutingDetail {
    /// Empty detail with the four well-known groups pre-seeded.
    pub(crate) fn new(previous: ActivationContext, next: ActivationContext) -> Self {
        let by_new_status = [
            UnitStatus::Mounted,
            UnitStatus::NotMounted,
            UnitStatus::NotLoaded,
            UnitStatus::Broken,
        ]
        .into_iter()
        .map(|s| (s, Vec::new()))
        .collect();
        Self {
            by_new_status,
            previous_context: previous,
            new_context: next,
            ..Self::default()
        }
    }

    pub(crate) fn add(&mut self, name: &str, status: UnitStatus) {
        self.changed.push(name.to_string());
        self.new_statuses.insert(name.to_string(), status);
        self.by_new_status
            .entry(status)
            .or_default()
            .push(name.to_string());
        self.total_changes = self.changed.len();
    }
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Name of the unit, if applicable.
    pub unit: Option<Arc<str>>,
    /// Status before a transition.
    pub from: Option<UnitStatus>,
    /// Status after a transition.
    pub to: Option<UnitStatus>,
    /// Lifecycle phase of timeout events.
    pub phase: Option<&'static str>,
    /// Configured duration of timeout events, in milliseconds (compact).
    pub timeout_ms: Option<u32>,
    /// Routing payload.
    pub detail: Option<Arc<RoutingDetail>>,

    cancel: Option<CancellationToken>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            unit: None,
            from: None,
            to: None,
            phase: None,
            timeout_ms: None,
            detail: None,
            cancel: None,
        }
    }

    #[inline]
    pub fn with_unit(mut self, unit: impl Into<Arc<str>>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    #[inline]
    pub fn with_transition(mut self, from: UnitStatus, to: UnitStatus) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    #[inline]
    pub fn with_phase(mut self, phase: &'static str) -> Self {
        self.phase = Some(phase);
        self
    }

    /// Attaches a timeout duration (stored as milliseconds).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.timeout_ms = Some(ms);
        self
    }

    #[inline]
    pub fn with_detail(mut self, detail: Arc<RoutingDetail>) -> Self {
        self.detail = Some(detail);
        self
    }

    #[inline]
    pub(crate) fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Requests cancellation of the current cycle.
    ///
    /// Returns `false` for events that are not cancellable.
    pub fn cancel_navigation(&self) -> bool {
        match &self.cancel {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    #[inline]
    pub fn is_routing(&self) -> bool {
        self.detail.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_is_monotonic() {
        let a = Event::new(EventKind::RoutingEvent);
        let b = Event::new(EventKind::RoutingEvent);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn test_detail_groups_by_status() {
        let mut detail = RoutingDetail::new("/a".into(), "/b".into());
        detail.add("nav", UnitStatus::Mounted);
        detail.add("old", UnitStatus::NotMounted);
        detail.add("side", UnitStatus::Mounted);

        assert_eq!(detail.total_changes, 3);
        assert_eq!(
            detail.by_new_status[&UnitStatus::Mounted],
            vec!["nav".to_string(), "side".to_string()]
        );
        assert!(detail.by_new_status[&UnitStatus::Broken].is_empty());
        assert_eq!(detail.new_statuses["old"], UnitStatus::NotMounted);
    }

    #[test]
    fn test_cancel_only_when_token_attached() {
        let token = CancellationToken::new();
        let ev = Event::new(EventKind::BeforeRoutingEvent).with_cancel(token.clone());
        assert!(ev.clone().cancel_navigation());
        assert!(token.is_cancelled());
        assert!(!Event::new(EventKind::AppChange).cancel_navigation());
    }
}
