//! # Global runtime configuration.
//!
//! Provides [`RuntimeConfig`] centralized settings for the lifecycle runtime.
//!
//! Config is used in two ways:
//! 1. **Runtime creation**: `Runtime::new(config)` / `Runtime::builder(config)`
//! 2. **Unit timeouts**: [`PhaseTimeouts`] defaults are merged with per-unit
//!    [`TimeoutOverrides`] when a unit is loaded.
//!
//! ## Validation
//! Timeout values are validated when they are built ([`TimeoutConfig::new`]),
//! never while a lifecycle call is running:
//! - `duration = 0` is rejected with [`ConfigError::NonPositiveDuration`]
//! - `warn_after = 0` falls back to [`DEFAULT_WARN_AFTER`]

use std::time::Duration;

use crate::error::ConfigError;
use crate::units::Phase;

/// Default interval between "still waiting" warnings.
pub const DEFAULT_WARN_AFTER: Duration = Duration::from_millis(1000);

/// Timeout policy for one lifecycle phase.
///
/// ## Field semantics
/// - `duration`: hard limit for the phase
/// - `hard_fail`: reject once `duration` elapses (`false` = log and keep waiting)
/// - `warn_after`: cadence of warnings while the phase is unresolved
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeoutConfig {
    duration: Duration,
    hard_fail: bool,
    warn_after: Duration,
}

impl TimeoutConfig {
    /// Builds a validated timeout policy.
    ///
    /// `warn_after = None` (or zero) uses [`DEFAULT_WARN_AFTER`].
    pub fn new(
        duration: Duration,
        hard_fail: bool,
        warn_after: Option<Duration>,
    ) -> Result<Self, ConfigError> {
        if duration.is_zero() {
            return Err(ConfigError::NonPositiveDuration);
        }
        let warn_after = warn_after
            .filter(|d| !d.is_zero())
            .unwrap_or(DEFAULT_WARN_AFTER);
        Ok(Self {
            duration,
            hard_fail,
            warn_after,
        })
    }

    /// Soft timeout with the default warning cadence (infallible for non-zero `ms`).
    const fn soft_millis(ms: u64) -> Self {
        Self {
            duration: Duration::from_millis(ms),
            hard_fail: false,
            warn_after: DEFAULT_WARN_AFTER,
        }
    }

    #[inline]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    #[inline]
    pub fn hard_fail(&self) -> bool {
        self.hard_fail
    }

    #[inline]
    pub fn warn_after(&self) -> Duration {
        self.warn_after
    }
}

/// Timeout policies for every supervised phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhaseTimeouts {
    pub bootstrap: TimeoutConfig,
    pub mount: TimeoutConfig,
    pub unmount: TimeoutConfig,
    pub unload: TimeoutConfig,
    pub update: TimeoutConfig,
}

impl PhaseTimeouts {
    /// Returns the policy for `phase`.
    pub fn get(&self, phase: Phase) -> TimeoutConfig {
        match phase {
            Phase::Bootstrap => self.bootstrap,
            Phase::Mount => self.mount,
            Phase::Unmount => self.unmount,
            Phase::Unload => self.unload,
            Phase::Update => self.update,
        }
    }

    /// Replaces the policy for `phase`.
    pub fn set(&mut self, phase: Phase, cfg: TimeoutConfig) {
        match phase {
            Phase::Bootstrap => self.bootstrap = cfg,
            Phase::Mount => self.mount = cfg,
            Phase::Unmount => self.unmount = cfg,
            Phase::Unload => self.unload = cfg,
            Phase::Update => self.update = cfg,
        }
    }

    /// Returns a copy with every override in `overrides` applied.
    pub fn merged(&self, overrides: &TimeoutOverrides) -> Self {
        let mut out = *self;
        for (phase, cfg) in overrides.iter() {
            out.set(phase, cfg);
        }
        out
    }
}

impl Default for PhaseTimeouts {
    /// - `bootstrap = 4000ms`
    /// - `mount`, `unmount`, `unload`, `update` = `3000ms`
    /// - `hard_fail = false`, `warn_after = 1000ms`
    fn default() -> Self {
        Self {
            bootstrap: TimeoutConfig::soft_millis(4000),
            mount: TimeoutConfig::soft_millis(3000),
            unmount: TimeoutConfig::soft_millis(3000),
            unload: TimeoutConfig::soft_millis(3000),
            update: TimeoutConfig::soft_millis(3000),
        }
    }
}

/// Per-unit timeout overrides (unset phases inherit the global defaults).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TimeoutOverrides {
    entries: Vec<(Phase, TimeoutConfig)>,
}

impl TimeoutOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets (or replaces) the override for `phase`.
    pub fn with(mut self, phase: Phase, cfg: TimeoutConfig) -> Self {
        self.entries.retain(|(p, _)| *p != phase);
        self.entries.push((phase, cfg));
        self
    }

    pub fn get(&self, phase: Phase) -> Option<TimeoutConfig> {
        self.entries
            .iter()
            .find(|(p, _)| *p == phase)
            .map(|(_, cfg)| *cfg)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn iter(&self) -> impl Iterator<Item = (Phase, TimeoutConfig)> + '_ {
        self.entries.iter().copied()
    }
}

/// What `handle_error` does when no error handler is registered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UnhandledErrorPolicy {
    /// Re-raise on a detached task so the failure surfaces as an uncaught panic.
    #[default]
    Panic,
    /// Only emit the error through `tracing::error!`.
    Log,
}

/// Global configuration for the lifecycle runtime.
///
/// ## Field semantics
/// - `timeouts`: default per-phase timeout policies
/// - `bus_capacity`: broadcast ring buffer size (min 1; clamped by Bus)
/// - `load_error_cooldown`: minimum wait before a `load-error` unit is retried
/// - `unhandled`: policy for errors nobody handles
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub timeouts: PhaseTimeouts,
    pub bus_capacity: usize,
    pub load_error_cooldown: Duration,
    pub unhandled: UnhandledErrorPolicy,
}

impl RuntimeConfig {
    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for RuntimeConfig {
    /// - `timeouts = PhaseTimeouts::default()`
    /// - `bus_capacity = 1024`
    /// - `load_error_cooldown = 200ms`
    /// - `unhandled = UnhandledErrorPolicy::Panic`
    fn default() -> Self {
        Self {
            timeouts: PhaseTimeouts::default(),
            bus_capacity: 1024,
            load_error_cooldown: Duration::from_millis(200),
            unhandled: UnhandledErrorPolicy::default(),
        }
    }
}
