//! # Props handed to lifecycle calls.
//!
//! Every loader and lifecycle call receives a fresh [`Props`] bag: the unit
//! name, its resolved custom props, a handle back to the runtime, and helpers to
//! mount child parcels (and, for parcels, to unmount themselves).

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{Map, Value};

use crate::core::{ParcelConfig, ParcelHandle, Runtime, parcel};
use crate::error::ParcelError;

use super::activity::ActivationContext;
use super::unit::Unit;

type CustomPropsFn = dyn Fn(&str, &ActivationContext) -> Value + Send + Sync;

/// User data passed to a unit: a JSON object, or a function computing one.
#[derive(Clone)]
pub enum CustomProps {
    /// Fixed value.
    Static(Value),
    /// Recomputed from the unit name and ambient context on every call.
    Dynamic(Arc<CustomPropsFn>),
}

impl CustomProps {
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&str, &ActivationContext) -> Value + Send + Sync + 'static,
    {
        CustomProps::Dynamic(Arc::new(f))
    }

    /// A static value must be an object; functions are checked when called.
    pub fn is_valid(&self) -> bool {
        match self {
            CustomProps::Static(v) => v.is_object(),
            CustomProps::Dynamic(_) => true,
        }
    }

    /// Resolves the props; a non-object result is replaced by `{}` with a warning.
    pub(crate) fn resolve(&self, name: &str, ctx: &ActivationContext) -> Value {
        let value = match self {
            CustomProps::Static(v) => v.clone(),
            CustomProps::Dynamic(f) => f(name, ctx),
        };
        if value.is_object() {
            value
        } else {
            tracing::warn!(
                unit = %name,
                received = %value,
                "customProps function must return an object"
            );
            Value::Object(Map::new())
        }
    }
}

impl Default for CustomProps {
    fn default() -> Self {
        CustomProps::Static(Value::Object(Map::new()))
    }
}

impl From<Value> for CustomProps {
    fn from(value: Value) -> Self {
        CustomProps::Static(value)
    }
}

impl fmt::Debug for CustomProps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CustomProps::Static(v) => f.debug_tuple("Static").field(v).finish(),
            CustomProps::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// Property bag for one lifecycle call.
#[derive(Clone)]
pub struct Props {
    name: Arc<str>,
    custom: Arc<Value>,
    unit: Arc<Unit>,
    runtime: Runtime,
}

impl Props {
    /// Builds props for `unit` against the runtime's ambient context.
    pub(crate) fn for_unit(runtime: &Runtime, unit: &Arc<Unit>) -> Self {
        let name = unit.name();
        let ctx = runtime.context();
        let source = unit.custom.lock().clone();
        let custom = source.resolve(&name, &ctx);
        Self {
            name,
            custom: Arc::new(custom),
            unit: Arc::clone(unit),
            runtime: runtime.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolved custom props (always a JSON object).
    pub fn custom(&self) -> &Value {
        &self.custom
    }

    /// Shorthand for `custom().get(key)`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.custom.get(key)
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Mounts a parcel owned by the unit these props belong to.
    pub fn mount_parcel(
        &self,
        config: impl Into<ParcelConfig>,
        custom: Value,
    ) -> Result<ParcelHandle, ParcelError> {
        parcel::mount_parcel(&self.runtime, &self.unit, config.into(), custom)
    }

    /// For parcels: unmounts (and detaches) the parcel itself. `None` for applications.
    pub fn unmount_self(&self) -> Option<BoxFuture<'static, Result<(), ParcelError>>> {
        self.unit.link.as_ref()?;
        Some(parcel::unmount_this_parcel(
            self.runtime.clone(),
            Arc::clone(&self.unit),
        ))
    }
}

impl fmt::Debug for Props {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Props")
            .field("name", &self.name)
            .field("custom", &self.custom)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_static_must_be_object() {
        assert!(CustomProps::from(json!({"a": 1})).is_valid());
        assert!(!CustomProps::from(json!([1, 2])).is_valid());
        assert!(CustomProps::from_fn(|_, _| json!(null)).is_valid());
    }

    #[test]
    fn test_dynamic_sees_name_and_context() {
        let props = CustomProps::from_fn(|name, ctx| json!({"who": name, "at": ctx.as_str()}));
        let value = props.resolve("nav", &"/home".into());
        assert_eq!(value, json!({"who": "nav", "at": "/home"}));
    }

    #[test]
    fn test_non_object_falls_back_to_empty() {
        let props = CustomProps::from_fn(|_, _| json!("nope"));
        assert_eq!(props.resolve("nav", &ActivationContext::default()), json!({}));
    }
}
