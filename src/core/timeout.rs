//! # Timeout supervision of a single lifecycle call.
//!
//! Wraps one phase future with a hard timer and a repeating warning timer and
//! publishes `timeout-warning` / `timeout-hit` events.
//!
//! ```text
//!  t=0        warn        2·warn   ...        duration
//!  │──────────┼───────────┼────────── ... ────┤
//!  start      warning #1  warning #2          hard timer
//!                                               ├─ hard_fail: publish TimeoutHit, reject
//!                                               └─ soft: log + TimeoutHit, keep waiting
//! ```
//!
//! ## Rules
//! - Warning `n` fires at `n × warn_after`; the next one is armed only while
//!   `(n + 1) × warn_after < duration`.
//! - No warning fires after the hard timer did.
//! - A settled operation wins over a timer that became ready in the same poll.
//! - On a hard timeout the operation keeps running detached; its late result
//!   changes nothing.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::time::{self, Instant};

use crate::config::TimeoutConfig;
use crate::error::PhaseError;
use crate::events::{Event, EventKind};
use crate::units::unit::Unit;
use crate::units::{BoxLifecycleFuture, Phase, Props, UnitKind};

use super::Runtime;

/// Runs `op` under `cfg`.
pub(crate) async fn supervise(
    rt: &Runtime,
    unit_kind: UnitKind,
    name: Arc<str>,
    phase: Phase,
    cfg: TimeoutConfig,
    op: BoxLifecycleFuture,
) -> Result<(), PhaseError> {
    let start = Instant::now();
    let warn_after = cfg.warn_after();
    let mut warned: u32 = 0;
    let mut warn_at = (warn_after < cfg.duration()).then(|| start + warn_after);
    let mut hard_at = Some(start + cfg.duration());

    let mut op = op;
    loop {
        tokio::select! {
            biased;

            res = &mut op => {
                return res.map_err(|e| PhaseError::Rejected {
                    phase,
                    message: format!("{e:#}"),
                });
            }
            _ = sleep_until(hard_at) => {
                hard_at = None;
                warn_at = None;
                publish(rt, EventKind::TimeoutHit, &name, phase, cfg.duration());

                if cfg.hard_fail() {
                    detach(op);
                    return Err(PhaseError::TimedOut {
                        phase,
                        unit_kind,
                        unit_name: name,
                        duration: cfg.duration(),
                    });
                }
                tracing::error!(
                    unit = %name,
                    %phase,
                    timeout_ms = cfg.duration().as_millis() as u64,
                    "lifecycle function did not resolve or reject in time"
                );
            }
            _ = sleep_until(warn_at) => {
                warned += 1;
                tracing::warn!(
                    unit = %name,
                    %phase,
                    elapsed_ms = (warn_after * warned).as_millis() as u64,
                    "lifecycle function is taking a long time"
                );
                publish(rt, EventKind::TimeoutWarning, &name, phase, cfg.duration());

                let next = warn_after * (warned + 1);
                warn_at = (next < cfg.duration()).then(|| start + next);
            }
        }
    }
}

/// Runs `unit`'s `phase` lifecycle under the unit's effective timeout.
///
/// Resolves immediately when the unit has no lifecycles or no such phase.
pub(crate) async fn run_phase(rt: &Runtime, unit: &Arc<Unit>, phase: Phase) -> Result<(), PhaseError> {
    let (lifecycle, cfg) = {
        let st = unit.state.lock();
        let lifecycle = st.lifecycles.as_ref().and_then(|l| l.get(phase).cloned());
        (lifecycle, st.timeouts.get(phase))
    };
    let Some(lifecycle) = lifecycle else {
        return Ok(());
    };
    let props = Props::for_unit(rt, unit);
    supervise(rt, unit.kind, unit.name(), phase, cfg, lifecycle.run(props)).await
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn detach(op: BoxLifecycleFuture) {
    tokio::spawn(op.map(|_| ()));
}

fn publish(rt: &Runtime, kind: EventKind, name: &Arc<str>, phase: Phase, limit: Duration) {
    rt.publish(
        Event::new(kind)
            .with_unit(Arc::clone(name))
            .with_phase(phase.as_str())
            .with_timeout(limit),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::test_support::Recorder;

    fn cfg(ms: u64, hard: bool, warn: u64) -> TimeoutConfig {
        TimeoutConfig::new(
            Duration::from_millis(ms),
            hard,
            Some(Duration::from_millis(warn)),
        )
        .unwrap()
    }

    fn count(rec: &Recorder, kind: EventKind) -> usize {
        rec.kinds().into_iter().filter(|k| *k == kind).count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_op_resolves_without_events() {
        let rt = Runtime::new(RuntimeConfig::default());
        let rec = Recorder::install(&rt);
        let op = async { anyhow::Ok(()) }.boxed();

        let res = supervise(&rt, UnitKind::Application, "a".into(), Phase::Mount, cfg(3000, true, 1000), op).await;
        assert!(res.is_ok());
        assert!(rec.kinds().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_is_wrapped() {
        let rt = Runtime::new(RuntimeConfig::default());
        let op = async { Err(anyhow::anyhow!("nope")) }.boxed();

        let err = supervise(&rt, UnitKind::Application, "a".into(), Phase::Mount, cfg(3000, true, 1000), op)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "mount rejected: nope");
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_timeout_rejects() {
        let rt = Runtime::new(RuntimeConfig::default());
        let rec = Recorder::install(&rt);
        let op = async {
            time::sleep(Duration::from_secs(60)).await;
            anyhow::Ok(())
        }
        .boxed();

        let err = supervise(&rt, UnitKind::Application, "slow".into(), Phase::Mount, cfg(3000, true, 1000), op)
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "lifecycle function mount for application slow did not resolve or reject for 3000 ms"
        );
        // warnings at 1000 and 2000 only
        assert_eq!(count(&rec, EventKind::TimeoutWarning), 2);
        assert_eq!(count(&rec, EventKind::TimeoutHit), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_soft_timeout_keeps_waiting() {
        let rt = Runtime::new(RuntimeConfig::default());
        let rec = Recorder::install(&rt);
        let op = async {
            time::sleep(Duration::from_millis(5000)).await;
            anyhow::Ok(())
        }
        .boxed();

        let res = supervise(&rt, UnitKind::Parcel, "p".into(), Phase::Unmount, cfg(1000, false, 400), op).await;

        assert!(res.is_ok());
        assert_eq!(count(&rec, EventKind::TimeoutWarning), 2);
        assert_eq!(count(&rec, EventKind::TimeoutHit), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_warn_not_before_duration_is_skipped() {
        let rt = Runtime::new(RuntimeConfig::default());
        let rec = Recorder::install(&rt);
        let op = async {
            time::sleep(Duration::from_millis(700)).await;
            anyhow::Ok(())
        }
        .boxed();

        let res = supervise(&rt, UnitKind::Application, "a".into(), Phase::Bootstrap, cfg(500, false, 1000), op).await;

        assert!(res.is_ok());
        assert_eq!(count(&rec, EventKind::TimeoutWarning), 0);
        assert_eq!(count(&rec, EventKind::TimeoutHit), 1);
    }
}
