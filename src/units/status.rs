//! # Unit status, kind and lifecycle phases.
//!
//! [`UnitStatus`] is the single source of truth for where a unit is in its lifecycle.
//! Statuses only change through the lifecycle state machine (`core::lifecycles`).
//!
//! ## Status graph
//! ```text
//! not-loaded ─► loading-source ─► not-bootstrapped ─► bootstrapping ─► not-mounted
//!                    │                                                  │   ▲
//!                    ▼                                                  ▼   │
//!                load-error                                        mounting │
//!                                                                       │   │
//!                                                                       ▼   │
//!                                   updating ◄──────────────────────► mounted
//!                                                                       │   │
//!                                                                       ▼   │
//!                                                                   unmounting
//!
//! not-bootstrapped / not-mounted / load-error ─► unloading ─► not-loaded
//! (almost) any status ─► broken   (absorbing)
//! ```

use std::fmt;

/// Lifecycle status of an application or parcel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UnitStatus {
    /// Registered, code not fetched yet.
    NotLoaded,
    /// Loader (or deferred parcel config) in flight.
    LoadingSource,
    /// Loaded, bootstrap not run yet.
    NotBootstrapped,
    /// Bootstrap in flight.
    Bootstrapping,
    /// Bootstrapped (or unmounted) and ready to mount.
    NotMounted,
    /// Mount in flight.
    Mounting,
    /// Mounted and active.
    Mounted,
    /// Parcel update in flight.
    Updating,
    /// Unmount in flight.
    Unmounting,
    /// Unload in flight.
    Unloading,
    /// Last load attempt rejected; retried after a cooldown.
    LoadError,
    /// Permanently skipped for the rest of the run.
    Broken,
}

impl UnitStatus {
    /// Returns a stable kebab-case label.
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::NotLoaded => "not-loaded",
            UnitStatus::LoadingSource => "loading-source",
            UnitStatus::NotBootstrapped => "not-bootstrapped",
            UnitStatus::Bootstrapping => "bootstrapping",
            UnitStatus::NotMounted => "not-mounted",
            UnitStatus::Mounting => "mounting",
            UnitStatus::Mounted => "mounted",
            UnitStatus::Updating => "updating",
            UnitStatus::Unmounting => "unmounting",
            UnitStatus::Unloading => "unloading",
            UnitStatus::LoadError => "load-error",
            UnitStatus::Broken => "broken",
        }
    }

    /// True for statuses the orchestrator never moves a unit out of on its own.
    pub fn is_failure(&self) -> bool {
        matches!(self, UnitStatus::LoadError | UnitStatus::Broken)
    }

    /// Returns `true` if `self → next` is an edge of the status graph.
    ///
    /// `broken` is reachable from every other status and has no outgoing edges.
    pub fn can_transition_to(&self, next: UnitStatus) -> bool {
        use UnitStatus::*;

        if *self == Broken {
            return false;
        }
        if next == Broken {
            return true;
        }
        matches!(
            (*self, next),
            (NotLoaded, LoadingSource)
                | (LoadError, LoadingSource)
                | (LoadingSource, NotBootstrapped)
                | (LoadingSource, LoadError)
                | (NotBootstrapped, Bootstrapping)
                | (Bootstrapping, NotMounted)
                | (NotMounted, Mounting)
                | (Mounting, Mounted)
                | (Mounted, Updating)
                | (Updating, Mounted)
                | (Mounted, Unmounting)
                | (Unmounting, NotMounted)
                | (NotBootstrapped, Unloading)
                | (NotMounted, Unloading)
                | (LoadError, Unloading)
                | (Unloading, NotLoaded)
        )
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of unit a status belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitKind {
    /// Registered through the runtime and driven by reroute cycles.
    Application,
    /// Mounted programmatically inside an owner.
    Parcel,
    /// Runtime-level owner of root parcels; never loaded or mounted itself.
    Root,
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnitKind::Application => "application",
            UnitKind::Parcel => "parcel",
            UnitKind::Root => "root",
        })
    }
}

/// Supervised lifecycle phases (each has its own timeout configuration).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Bootstrap,
    Mount,
    Unmount,
    Unload,
    Update,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Bootstrap => "bootstrap",
            Phase::Mount => "mount",
            Phase::Unmount => "unmount",
            Phase::Unload => "unload",
            Phase::Update => "update",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_edges() {
        use UnitStatus::*;
        let path = [
            NotLoaded,
            LoadingSource,
            NotBootstrapped,
            Bootstrapping,
            NotMounted,
            Mounting,
            Mounted,
            Unmounting,
            NotMounted,
            Unloading,
            NotLoaded,
        ];
        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{} -> {} should be allowed",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_no_skips_or_reversals() {
        use UnitStatus::*;
        assert!(!NotLoaded.can_transition_to(Mounted));
        assert!(!Mounted.can_transition_to(Mounting));
        assert!(!NotMounted.can_transition_to(Bootstrapping));
        assert!(!Unmounting.can_transition_to(Mounted));
    }

    #[test]
    fn test_broken_is_absorbing() {
        for status in [
            UnitStatus::NotLoaded,
            UnitStatus::Mounting,
            UnitStatus::Unloading,
            UnitStatus::LoadError,
        ] {
            assert!(status.can_transition_to(UnitStatus::Broken));
        }
        assert!(!UnitStatus::Broken.can_transition_to(UnitStatus::NotLoaded));
        assert!(!UnitStatus::Broken.can_transition_to(UnitStatus::Broken));
    }

    #[test]
    fn test_labels() {
        assert_eq!(UnitStatus::LoadError.to_string(), "load-error");
        assert_eq!(UnitKind::Parcel.to_string(), "parcel");
        assert_eq!(Phase::Unmount.to_string(), "unmount");
    }
}
