//! # Application registration input.
//!
//! [`Registration`] is the normalized description of an application handed to
//! `Runtime::register_application`. It is validated there before any unit is
//! created.
//!
//! ## Example
//! ```rust
//! use mountvisor::{Activity, Registration, UnitExports};
//! use serde_json::json;
//!
//! let exports = UnitExports::new()
//!     .mount(|_| async { anyhow::Ok(()) })
//!     .unmount(|_| async { anyhow::Ok(()) });
//!
//! let reg = Registration::with_exports("nav", exports)
//!     .activity(Activity::always())
//!     .custom_props(json!({"theme": "dark"}));
//! assert_eq!(reg.name(), "nav");
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use crate::config::TimeoutOverrides;

use super::activity::Activity;
use super::lifecycle::{LoadFn, LoadRef, Ready, UnitExports};
use super::props::{CustomProps, Props};

/// Everything needed to register an application.
#[derive(Clone)]
pub struct Registration {
    pub(crate) name: String,
    pub(crate) loader: LoadRef,
    pub(crate) activity: Activity,
    pub(crate) custom: CustomProps,
    pub(crate) timeouts: TimeoutOverrides,
}

impl Registration {
    /// Registration with an explicit loader.
    ///
    /// Defaults: never active, empty custom props, no timeout overrides.
    pub fn new(name: impl Into<String>, loader: LoadRef) -> Self {
        Self {
            name: name.into(),
            loader,
            activity: Activity::never(),
            custom: CustomProps::default(),
            timeouts: TimeoutOverrides::default(),
        }
    }

    /// Registration with a closure loader.
    pub fn with_loader<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Props) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<UnitExports>> + Send + 'static,
    {
        Self::new(name, LoadFn::arc(f))
    }

    /// Registration of already-available exports (loading resolves immediately).
    pub fn with_exports(name: impl Into<String>, exports: UnitExports) -> Self {
        Self::new(name, Arc::new(Ready(exports)))
    }

    pub fn activity(mut self, activity: Activity) -> Self {
        self.activity = activity;
        self
    }

    pub fn custom_props(mut self, custom: impl Into<CustomProps>) -> Self {
        self.custom = custom.into();
        self
    }

    /// Custom props computed from the unit name and ambient context.
    pub fn custom_props_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &super::ActivationContext) -> Value + Send + Sync + 'static,
    {
        self.custom = CustomProps::from_fn(f);
        self
    }

    pub fn timeouts(mut self, timeouts: TimeoutOverrides) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .field("custom", &self.custom)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}
