//! Error types used by the mountvisor runtime and its units.
//!
//! - [`UnitError`] the normalized error every unit-scoped failure is turned into.
//! - [`Fault`] the raw failure handed to the error transformer.
//! - [`PhaseError`] outcome of a supervised lifecycle call (rejected or timed out).
//! - [`RegistrationError`], [`ConfigError`] synchronous API misuse.
//! - [`ParcelError`], [`UnloadError`], [`RerouteError`] results of the public handles.
//!
//! All types provide `as_label` for logs.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::units::{Phase, UnitKind, UnitStatus};

/// Classification of a normalized unit error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input rejected before it reached a unit.
    Validation,
    /// Loader resolved something that is not a usable unit (or broke its contract).
    LoaderContract,
    /// Loader rejected; the unit is retried after the cooldown.
    LoadTransient,
    /// A lifecycle operation rejected.
    Lifecycle,
    /// A lifecycle operation exceeded its hard timeout.
    Timeout,
    /// The activation predicate failed.
    Activation,
    /// The orchestrator itself failed.
    Orchestration,
}

impl ErrorKind {
    pub fn as_label(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::LoaderContract => "loader_contract",
            ErrorKind::LoadTransient => "load_transient",
            ErrorKind::Lifecycle => "lifecycle",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Activation => "activation",
            ErrorKind::Orchestration => "orchestration",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// # Normalized unit error.
///
/// Built by the error transformer from a [`Fault`]. The message carries a prefix
/// naming the unit and the status it was in *before* the failure:
///
/// ```text
/// application 'nav' died in status mounting: mount rejected: boom
/// ```
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct UnitError {
    /// Error classification.
    pub kind: ErrorKind,
    /// Kind of the failed unit.
    pub unit_kind: UnitKind,
    /// Name of the failed unit.
    pub unit_name: Arc<str>,
    /// Status the unit was in when it failed.
    pub prior_status: UnitStatus,
    /// Lifecycle phase, when the failure came from a supervised call.
    pub phase: Option<Phase>,
    /// Full message including the unit prefix.
    pub message: String,
    /// Failure of a child parcel that downgraded this unit.
    pub child: Option<Box<ParcelError>>,
}

impl UnitError {
    pub fn as_label(&self) -> &'static str {
        self.kind.as_label()
    }

    /// True if the failure was a hard timeout.
    pub fn is_timeout(&self) -> bool {
        self.kind == ErrorKind::Timeout
    }
}

/// Raw failure fed to the error transformer.
#[non_exhaustive]
#[derive(Debug)]
pub enum Fault {
    /// Loader future rejected.
    Load(anyhow::Error),
    /// Loader panicked before producing a future.
    LoaderPanicked(String),
    /// Loader resolved with unusable exports.
    InvalidExports(InvalidExports),
    /// Supervised lifecycle call rejected or timed out.
    Phase(PhaseError),
    /// Activation predicate failed.
    Activation(String),
    /// A child parcel failed to unmount.
    ChildUnmount(ParcelError),
}

impl Fault {
    /// Maps the fault onto the error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Fault::Load(_) => ErrorKind::LoadTransient,
            Fault::LoaderPanicked(_) | Fault::InvalidExports(_) => ErrorKind::LoaderContract,
            Fault::Phase(PhaseError::TimedOut { .. }) => ErrorKind::Timeout,
            Fault::Phase(PhaseError::Rejected { .. }) => ErrorKind::Lifecycle,
            Fault::Activation(_) => ErrorKind::Activation,
            Fault::ChildUnmount(_) => ErrorKind::Lifecycle,
        }
    }

    pub(crate) fn phase(&self) -> Option<Phase> {
        match self {
            Fault::Phase(e) => Some(e.phase()),
            Fault::ChildUnmount(_) => Some(Phase::Unmount),
            _ => None,
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::Load(e) => write!(f, "{e:#}"),
            Fault::LoaderPanicked(msg) => write!(f, "loading function panicked: {msg}"),
            Fault::InvalidExports(e) => write!(f, "{e}"),
            Fault::Phase(e) => write!(f, "{e}"),
            Fault::Activation(msg) => write!(f, "activity function failed: {msg}"),
            Fault::ChildUnmount(e) => write!(f, "{e}"),
        }
    }
}

/// # Outcome of a supervised lifecycle call.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum PhaseError {
    /// The operation itself rejected (or panicked).
    #[error("{phase} rejected: {message}")]
    Rejected { phase: Phase, message: String },

    /// The operation did not settle within the configured duration.
    #[error(
        "lifecycle function {phase} for {unit_kind} {unit_name} did not resolve or reject for {} ms",
        .duration.as_millis()
    )]
    TimedOut {
        phase: Phase,
        unit_kind: UnitKind,
        unit_name: Arc<str>,
        duration: Duration,
    },
}

impl PhaseError {
    pub fn phase(&self) -> Phase {
        match self {
            PhaseError::Rejected { phase, .. } | PhaseError::TimedOut { phase, .. } => *phase,
        }
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            PhaseError::Rejected { .. } => "phase_rejected",
            PhaseError::TimedOut { .. } => "phase_timeout",
        }
    }
}

/// Structural problems with the exports a loader resolved.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidExports {
    #[error("does not export a mount function or array of functions")]
    MissingMount,
    #[error("does not export an unmount function or array of functions")]
    MissingUnmount,
    #[error("does not export a valid bootstrap function or array of functions")]
    InvalidBootstrap,
    #[error("does not export a valid unload function or array of functions")]
    InvalidUnload,
    #[error("provided an invalid update function")]
    InvalidUpdate,
}

impl InvalidExports {
    pub fn as_label(&self) -> &'static str {
        match self {
            InvalidExports::MissingMount => "exports_missing_mount",
            InvalidExports::MissingUnmount => "exports_missing_unmount",
            InvalidExports::InvalidBootstrap => "exports_invalid_bootstrap",
            InvalidExports::InvalidUnload => "exports_invalid_unload",
            InvalidExports::InvalidUpdate => "exports_invalid_update",
        }
    }
}

/// Rejected timeout configuration.
#[non_exhaustive]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max time must be a positive number of milliseconds")]
    NonPositiveDuration,
}

impl ConfigError {
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::NonPositiveDuration => "config_non_positive_duration",
        }
    }
}

/// # Errors raised synchronously by the registration API.
///
/// A failed call never mutates the registry.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("application name must be a non-empty string")]
    EmptyName,

    #[error("there is already an app registered with name {name}")]
    Duplicate { name: String },

    #[error("no application named '{name}' has been registered")]
    NotRegistered { name: String },

    #[error("custom props for '{name}' must be an object")]
    InvalidCustomProps { name: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl RegistrationError {
    pub fn as_label(&self) -> &'static str {
        match self {
            RegistrationError::EmptyName => "registration_empty_name",
            RegistrationError::Duplicate { .. } => "registration_duplicate",
            RegistrationError::NotRegistered { .. } => "registration_not_registered",
            RegistrationError::InvalidCustomProps { .. } => "registration_invalid_custom_props",
            RegistrationError::Config(_) => "registration_config",
        }
    }
}

/// # Errors surfaced by parcel handles.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum ParcelError {
    /// Config exports failed validation.
    #[error("parcel {name} {source}")]
    InvalidConfig {
        name: String,
        #[source]
        source: InvalidExports,
    },

    /// Custom props were not a JSON object.
    #[error("parcel custom props must be an object")]
    InvalidCustomProps,

    /// The deferred config future rejected.
    #[error("parcel {name} config failed to load: {message}")]
    LoadFailed { name: String, message: String },

    #[error("cannot mount parcel '{name}' -- it is in a {status} status")]
    NotMountable { name: String, status: UnitStatus },

    #[error("cannot unmount parcel '{name}' -- it is in a {status} status")]
    NotUnmountable { name: String, status: UnitStatus },

    #[error("cannot update parcel '{name}' because it is not mounted ({status})")]
    NotUpdatable { name: String, status: UnitStatus },

    #[error("parcel '{name}' does not export an update function")]
    UpdateUnsupported { name: String },

    /// A lifecycle call failed with hard-fail semantics.
    #[error(transparent)]
    Unit(#[from] UnitError),

    /// The task driving this parcel went away before settling.
    #[error("parcel '{name}' was abandoned before settling")]
    Abandoned { name: String },
}

impl ParcelError {
    pub fn as_label(&self) -> &'static str {
        match self {
            ParcelError::InvalidConfig { .. } => "parcel_invalid_config",
            ParcelError::InvalidCustomProps => "parcel_invalid_custom_props",
            ParcelError::LoadFailed { .. } => "parcel_load_failed",
            ParcelError::NotMountable { .. } => "parcel_not_mountable",
            ParcelError::NotUnmountable { .. } => "parcel_not_unmountable",
            ParcelError::NotUpdatable { .. } => "parcel_not_updatable",
            ParcelError::UpdateUnsupported { .. } => "parcel_update_unsupported",
            ParcelError::Unit(_) => "parcel_unit",
            ParcelError::Abandoned { .. } => "parcel_abandoned",
        }
    }
}

/// Result of an unload request.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum UnloadError {
    /// The unload operation rejected; the unit is broken.
    #[error(transparent)]
    Failed(#[from] UnitError),

    /// The request was dropped (runtime reset) before it settled.
    #[error("unload of '{name}' was abandoned")]
    Abandoned { name: String },
}

impl UnloadError {
    pub fn as_label(&self) -> &'static str {
        match self {
            UnloadError::Failed(_) => "unload_failed",
            UnloadError::Abandoned { .. } => "unload_abandoned",
        }
    }
}

/// Failure of a reroute request.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RerouteError {
    /// The cycle was dropped before resolving (runtime reset or shut down).
    #[error("reroute interrupted before completion")]
    Interrupted,

    /// The cycle itself failed outside any unit-scoped handler.
    #[error("reroute cycle failed: {message}")]
    Orchestration { message: String },
}

impl RerouteError {
    pub fn as_label(&self) -> &'static str {
        match self {
            RerouteError::Interrupted => "reroute_interrupted",
            RerouteError::Orchestration { .. } => "reroute_orchestration",
        }
    }
}
