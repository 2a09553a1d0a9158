//! Managed object capability model.
//!
//! One trait covers every resource. Optional capabilities are advertised
//! through [`Capabilities`] and default to off:
//! - plain: [`ManagedObject::object`] returns the value immediately
//! - asynchronous: the object is given an [`AsyncListener`] and users wait
//!   until it signals completion
//! - coordinating: the object resolves named dependencies before use

use crate::container::AsyncListener;
use conductor_core::{kinds, Cause, Value};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Optional capabilities of a managed object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Object signals completion of asynchronous operations
    pub asynchronous: bool,

    /// Object resolves dependencies before becoming usable
    pub coordinating: bool,
}

impl Capabilities {
    /// No optional capabilities.
    pub const PLAIN: Capabilities = Capabilities {
        asynchronous: false,
        coordinating: false,
    };

    /// Asynchronous capability only.
    pub const ASYNCHRONOUS: Capabilities = Capabilities {
        asynchronous: true,
        coordinating: false,
    };

    /// Coordinating capability only.
    pub const COORDINATING: Capabilities = Capabilities {
        asynchronous: false,
        coordinating: true,
    };
}

/// A resource instance injected into functions.
pub trait ManagedObject: Send + Sync + 'static {
    /// The value handed to functions.
    fn object(&self) -> Result<Value, Cause>;

    /// Optional capabilities.
    fn capabilities(&self) -> Capabilities {
        Capabilities::PLAIN
    }

    /// Receive the listener for asynchronous operations.
    ///
    /// Only called when [`Capabilities::asynchronous`] is set. The object
    /// must call [`AsyncListener::complete`] exactly once for the initial
    /// load, possibly from another thread.
    fn register_async_listener(&self, _listener: AsyncListener) {}

    /// Resolve dependencies.
    ///
    /// Only called when [`Capabilities::coordinating`] is set.
    fn coordinate(&self, _dependencies: &Dependencies) -> Result<(), Cause> {
        Ok(())
    }
}

/// A managed object wrapping a plain value.
pub struct PlainObject {
    value: Value,
}

impl PlainObject {
    /// Wrap a value.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Arc::new(value),
        }
    }

    /// Wrap an already shared value.
    pub fn from_value(value: Value) -> Self {
        Self { value }
    }
}

impl ManagedObject for PlainObject {
    fn object(&self) -> Result<Value, Cause> {
        Ok(self.value.clone())
    }
}

/// Named dependency values resolved for a coordinating object.
#[derive(Default, Clone)]
pub struct Dependencies {
    values: HashMap<String, Value>,
}

impl Dependencies {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a dependency value.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    /// Dependency by name.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Typed dependency by name.
    pub fn get<T: Any>(&self, name: &str) -> Result<&T, Cause> {
        let value = self.values.get(name).ok_or_else(|| {
            Cause::new(kinds::object_access(), format!("dependency '{}' is not available", name))
        })?;
        value.downcast_ref::<T>().ok_or_else(|| {
            Cause::new(
                kinds::object_access(),
                format!("dependency '{}' is not a {}", name, std::any::type_name::<T>()),
            )
        })
    }

    /// Number of registered dependencies.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no dependencies are registered.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
