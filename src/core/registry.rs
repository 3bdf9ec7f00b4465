//! # Application registry and pending-change classification.
//!
//! The registry owns the registered application units (in registration order)
//! and the pending unload records. It never runs lifecycle code itself: the
//! reroute orchestrator asks it to classify units into the four change sets.
//!
//! ## Classification
//! ```text
//! status                         active   other                    → set
//! load-error                     yes      cooldown elapsed         → to_load
//! not-loaded | loading-source    yes                               → to_load
//! not-bootstrapped | not-mounted no       unload record pending    → to_unload
//! not-bootstrapped | not-mounted yes                               → to_mount
//! mounted                        no                                → to_unmount
//! broken                         (never evaluated)
//! ```
//!
//! ## Rules
//! - Names are unique; a duplicate registration leaves the registry unchanged.
//! - Classification runs over a snapshot; no registry lock is held while
//!   activity predicates run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::RegistrationError;
use crate::units::UnitStatus;
use crate::units::unit::Unit;

use super::lifecycles::UnloadSlot;

/// The four change sets computed for one reroute cycle.
#[derive(Default)]
pub(crate) struct PendingChanges {
    pub(crate) to_unload: Vec<Arc<Unit>>,
    pub(crate) to_unmount: Vec<Arc<Unit>>,
    pub(crate) to_load: Vec<Arc<Unit>>,
    pub(crate) to_mount: Vec<Arc<Unit>>,
}

impl PendingChanges {
    /// `to_unload ++ to_load ++ to_unmount ++ to_mount`.
    pub(crate) fn changed(&self) -> Vec<Arc<Unit>> {
        self.to_unload
            .iter()
            .chain(&self.to_load)
            .chain(&self.to_unmount)
            .chain(&self.to_mount)
            .cloned()
            .collect()
    }
}

/// Registered applications and unload records.
#[derive(Default)]
pub(crate) struct Registry {
    units: Mutex<Vec<Arc<Unit>>>,
    unloads: Mutex<HashMap<Arc<str>, Arc<UnloadSlot>>>,
}

impl Registry {
    /// Adds `unit`; fails if its name is already registered.
    pub(crate) fn register(&self, unit: Arc<Unit>) -> Result<(), RegistrationError> {
        let name = unit.name();
        let mut units = self.units.lock();
        if units.iter().any(|u| u.name() == name) {
            return Err(RegistrationError::Duplicate {
                name: name.to_string(),
            });
        }
        units.push(unit);
        Ok(())
    }

    pub(crate) fn remove(&self, name: &str) -> Option<Arc<Unit>> {
        let mut units = self.units.lock();
        let idx = units.iter().position(|u| &*u.name() == name)?;
        Some(units.remove(idx))
    }

    pub(crate) fn find(&self, name: &str) -> Option<Arc<Unit>> {
        self.units
            .lock()
            .iter()
            .find(|u| &*u.name() == name)
            .cloned()
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<Unit>> {
        self.units.lock().clone()
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.snapshot().iter().map(|u| u.name().to_string()).collect()
    }

    pub(crate) fn mounted_names(&self) -> Vec<String> {
        self.snapshot()
            .iter()
            .filter(|u| u.is_mounted())
            .map(|u| u.name().to_string())
            .collect()
    }

    pub(crate) fn unload_slot(&self, name: &str) -> Option<Arc<UnloadSlot>> {
        self.unloads.lock().get(name).cloned()
    }

    /// Returns the pending record for `name`, creating one if absent.
    pub(crate) fn unload_slot_or_insert(&self, name: Arc<str>) -> Arc<UnloadSlot> {
        let mut unloads = self.unloads.lock();
        Arc::clone(
            unloads
                .entry(Arc::clone(&name))
                .or_insert_with(|| UnloadSlot::new(name)),
        )
    }

    /// Removes the record for `name` only if it is still `slot`.
    pub(crate) fn remove_unload(&self, name: &str, slot: &Arc<UnloadSlot>) -> bool {
        let mut unloads = self.unloads.lock();
        match unloads.get(name) {
            Some(current) if Arc::ptr_eq(current, slot) => {
                unloads.remove(name);
                true
            }
            _ => false,
        }
    }

    /// Drops every unit and returns the unload records for the caller to abandon.
    pub(crate) fn clear(&self) -> Vec<Arc<UnloadSlot>> {
        self.units.lock().clear();
        self.unloads.lock().drain().map(|(_, slot)| slot).collect()
    }

    /// Classifies every unit into the four change sets.
    ///
    /// `is_active` evaluates the activity predicate and may itself move the
    /// unit to `broken`; the status is re-read afterwards.
    pub(crate) fn pending_changes(
        &self,
        now: Instant,
        cooldown: Duration,
        mut is_active: impl FnMut(&Arc<Unit>) -> bool,
    ) -> PendingChanges {
        let mut changes = PendingChanges::default();

        for unit in self.snapshot() {
            if unit.status() == UnitStatus::Broken {
                continue;
            }
            let active = is_active(&unit);
            let (status, failed_at) = {
                let st = unit.state.lock();
                (st.status, st.load_error_at)
            };

            match status {
                UnitStatus::LoadError => {
                    let cooled = failed_at.is_none_or(|t| now.duration_since(t) >= cooldown);
                    if active && cooled {
                        changes.to_load.push(unit);
                    }
                }
                UnitStatus::NotLoaded | UnitStatus::LoadingSource => {
                    if active {
                        changes.to_load.push(unit);
                    }
                }
                UnitStatus::NotBootstrapped | UnitStatus::NotMounted => {
                    if !active && self.unload_slot(&unit.name()).is_some() {
                        changes.to_unload.push(unit);
                    } else if active {
                        changes.to_mount.push(unit);
                    }
                }
                UnitStatus::Mounted => {
                    if !active {
                        changes.to_unmount.push(unit);
                    }
                }
                _ => {}
            }
        }
        changes
    }
}
