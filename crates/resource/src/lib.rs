//! Managed objects.
//!
//! Resources injected into functions are [`ManagedObject`]s, created by a
//! [`ManagedObjectSource`] or leased from a bounded [`ManagedObjectPool`].
//! A [`ManagedObjectContainer`] owns one instance for the lifetime of its
//! scope and tracks whether it is ready to use.

#![warn(missing_docs)]

pub mod object;
pub mod source;
pub mod container;
pub mod pool;

pub use object::{Capabilities, Dependencies, ManagedObject, PlainObject};
pub use source::{FnSource, ManagedObjectSource, ObjectUser, SourceResult};
pub use container::{
    AsyncListener, ContainerState, ManagedObjectContainer, ObjectSourcing, Readiness, Waker,
};
pub use pool::{ManagedObjectPool, PoolStats};
