//! Managed object declarations.

use conductor_resource::{ManagedObject, ManagedObjectPool, ManagedObjectSource, ObjectSourcing};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Lifetime of a managed object instance.
///
/// Ordered from shortest to longest lived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectScope {
    /// One instance per function invocation
    Function,

    /// One instance per ThreadState
    Thread,

    /// One instance per ProcessState
    Process,
}

/// Where instances come from.
#[derive(Clone)]
pub enum ObjectProvider {
    /// Created by a source for every scope
    Source(Arc<dyn ManagedObjectSource>),

    /// Leased from a pool shared by all scopes
    Pool(Arc<ManagedObjectPool>),

    /// Supplied by the invoker of the process
    Input,
}

impl fmt::Debug for ObjectProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectProvider::Source(_) => write!(f, "Source"),
            ObjectProvider::Pool(pool) => write!(f, "Pool({})", pool.name()),
            ObjectProvider::Input => write!(f, "Input"),
        }
    }
}

/// A managed object available to the functions of a section.
#[derive(Debug, Clone)]
pub struct ObjectDescriptor {
    /// Name functions refer to
    pub name: String,

    /// Instance lifetime
    pub scope: ObjectScope,

    /// Instance provider
    pub provider: ObjectProvider,

    /// Objects handed to this one when it coordinates
    pub dependencies: Vec<String>,
}

impl ObjectDescriptor {
    /// Object created by `source`.
    pub fn sourced(name: impl Into<String>, scope: ObjectScope, source: Arc<dyn ManagedObjectSource>) -> Self {
        Self {
            name: name.into(),
            scope,
            provider: ObjectProvider::Source(source),
            dependencies: Vec::new(),
        }
    }

    /// Object leased from `pool`.
    pub fn pooled(name: impl Into<String>, scope: ObjectScope, pool: Arc<ManagedObjectPool>) -> Self {
        Self {
            name: name.into(),
            scope,
            provider: ObjectProvider::Pool(pool),
            dependencies: Vec::new(),
        }
    }

    /// Process scoped object bound at invocation.
    pub fn input(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: ObjectScope::Process,
            provider: ObjectProvider::Input,
            dependencies: Vec::new(),
        }
    }

    /// Add a dependency.
    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(name.into());
        self
    }
}

pub(crate) fn sourcing(provider: &ObjectProvider, bound: Option<Arc<dyn ManagedObject>>) -> ObjectSourcing {
    match provider {
        ObjectProvider::Source(source) => ObjectSourcing::Direct(source.clone()),
        ObjectProvider::Pool(pool) => ObjectSourcing::Pooled(pool.clone()),
        ObjectProvider::Input => ObjectSourcing::Bound(bound),
    }
}
