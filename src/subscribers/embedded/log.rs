//! # LogWriter: tracing event renderer
//!
//! A minimal subscriber that renders incoming [`Event`]s through `tracing`.
//!
//! ## Example output (fmt subscriber)
//! ```text
//! DEBUG mountvisor: [status] unit="nav" from=not-mounted to=mounting
//! WARN  mountvisor: [timeout-warning] unit="nav" phase="mount" timeout_ms=3000
//! INFO  mountvisor: [app-change] changed=["nav"] cancelled=false
//! ```

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Subscribe for LogWriter {
    fn on_event(&self, e: &Event) {
        let unit = e.unit.as_deref().unwrap_or("-");
        match e.kind {
            EventKind::StatusChanged => {
                tracing::debug!(
                    unit,
                    from = ?e.from,
                    to = ?e.to,
                    "[status]"
                );
            }
            EventKind::TimeoutWarning => {
                tracing::warn!(unit, phase = ?e.phase, timeout_ms = ?e.timeout_ms, "[timeout-warning]");
            }
            EventKind::TimeoutHit => {
                tracing::error!(unit, phase = ?e.phase, timeout_ms = ?e.timeout_ms, "[timeout-hit]");
            }
            EventKind::BeforeFirstMount | EventKind::FirstMount => {
                tracing::info!("[{}]", e.kind.as_str());
            }
            _ => match &e.detail {
                Some(detail) => tracing::info!(
                    changed = ?detail.changed,
                    cancelled = detail.cancelled,
                    context = %detail.new_context,
                    "[{}]",
                    e.kind.as_str()
                ),
                None => tracing::info!("[{}]", e.kind.as_str()),
            },
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
