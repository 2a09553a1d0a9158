//! Managed object container and its load state machine.
//!
//! ```text
//! UNLOADED → LOADING → (ASYNC_PENDING) → READY
//!                 ↘          ↘             ↘
//!                  FAILED ←───────────────── (coordination failure)
//! ```
//!
//! A container owns at most one instance. Users that find it loading or
//! waiting on an asynchronous operation register a waker and are woken,
//! once, when the state leaves LOADING/ASYNC_PENDING.

use crate::object::{Dependencies, ManagedObject};
use crate::pool::ManagedObjectPool;
use crate::source::{ManagedObjectSource, ObjectUser, SourceResult};
use conductor_core::sync::lock;
use conductor_core::{kinds, Cause, Value};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, Weak};

/// Load state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    /// Nothing sourced yet
    Unloaded,
    /// Sourcing in progress
    Loading,
    /// Waiting for the object to signal completion
    AsyncPending,
    /// Usable
    Ready,
    /// Sourcing or coordination failed
    Failed,
}

/// Where a container gets its instance from.
#[derive(Clone)]
pub enum ObjectSourcing {
    /// A new instance from a source
    Direct(Arc<dyn ManagedObjectSource>),
    /// An instance leased from a pool
    Pooled(Arc<ManagedObjectPool>),
    /// An instance supplied by the invoker
    Bound(Option<Arc<dyn ManagedObject>>),
}

/// Outcome of asking a container for its object.
#[derive(Debug, Clone)]
pub enum Readiness {
    /// Object is usable now
    Ready,
    /// The waker will be called once the state changes
    Pending,
    /// Object can not be used
    Failed(Cause),
}

/// Callback resuming a user parked on a container.
pub type Waker = Box<dyn FnOnce() + Send>;

struct ContainerInner {
    state: ContainerState,
    object: Option<Arc<dyn ManagedObject>>,
    failure: Option<Cause>,
    coordinated: bool,
    released: bool,
    waiters: Vec<Waker>,
}

/// Owns one managed object instance for a scope.
pub struct ManagedObjectContainer {
    name: String,
    sourcing: ObjectSourcing,
    inner: Mutex<ContainerInner>,
}

impl ManagedObjectContainer {
    /// Create an unloaded container.
    pub fn new(name: impl Into<String>, sourcing: ObjectSourcing) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            sourcing,
            inner: Mutex::new(ContainerInner {
                state: ContainerState::Unloaded,
                object: None,
                failure: None,
                coordinated: false,
                released: false,
                waiters: Vec::new(),
            }),
        })
    }

    /// Object name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state.
    pub fn state(&self) -> ContainerState {
        lock(&self.inner).state
    }

    /// Whether the object is usable without waiting.
    pub fn is_ready(&self) -> bool {
        let inner = lock(&self.inner);
        inner.state == ContainerState::Ready && inner.coordinated
    }

    /// Load the object, sourcing it on first demand.
    ///
    /// `dependencies` are handed to a coordinating object the first time
    /// it becomes ready. On [`Readiness::Pending`] the waker has been
    /// registered; otherwise it is dropped without being called.
    pub fn load(
        self: &Arc<Self>,
        dependencies: &Dependencies,
        waker: impl FnOnce() + Send + 'static,
    ) -> Readiness {
        let start = {
            let mut inner = lock(&self.inner);
            if inner.state == ContainerState::Unloaded && !inner.released {
                inner.state = ContainerState::Loading;
                true
            } else {
                false
            }
        };
        if start {
            tracing::trace!(object = %self.name, "Sourcing managed object");
            self.start_sourcing();
        }

        let mut inner = lock(&self.inner);
        if inner.released {
            return Readiness::Failed(Cause::new(
                kinds::object_sourcing(),
                format!("managed object '{}' was already released", self.name),
            ));
        }

        match inner.state {
            ContainerState::Loading | ContainerState::AsyncPending => {
                inner.waiters.push(Box::new(waker));
                Readiness::Pending
            }
            ContainerState::Ready => {
                if !inner.coordinated {
                    if let Err(cause) = Self::coordinate(&mut inner, dependencies) {
                        let cause = Cause::wrapping(
                            kinds::object_sourcing(),
                            format!("managed object '{}' failed to coordinate", self.name),
                            cause,
                        );
                        inner.state = ContainerState::Failed;
                        inner.failure = Some(cause.clone());
                        return Readiness::Failed(cause);
                    }
                }
                Readiness::Ready
            }
            ContainerState::Failed => Readiness::Failed(inner.failure.clone().unwrap_or_else(|| {
                Cause::new(kinds::object_sourcing(), format!("managed object '{}' failed", self.name))
            })),
            ContainerState::Unloaded => Readiness::Failed(Cause::new(
                kinds::object_sourcing(),
                format!("managed object '{}' is not loaded", self.name),
            )),
        }
    }

    fn coordinate(inner: &mut ContainerInner, dependencies: &Dependencies) -> Result<(), Cause> {
        if let Some(object) = &inner.object {
            if object.capabilities().coordinating {
                object.coordinate(dependencies)?;
            }
        }
        inner.coordinated = true;
        Ok(())
    }

    /// The object's value. Fails unless the container is ready.
    pub fn value(&self) -> Result<Value, Cause> {
        let object = {
            let inner = lock(&self.inner);
            match (&inner.state, &inner.object) {
                (ContainerState::Ready, Some(object)) => object.clone(),
                _ => {
                    return Err(Cause::new(
                        kinds::object_access(),
                        format!("managed object '{}' is not ready ({:?})", self.name, inner.state),
                    ))
                }
            }
        };
        object.object()
    }

    fn start_sourcing(self: &Arc<Self>) {
        let container = self.clone();
        let user = ObjectUser::new(move |result| container.on_sourced(result));

        match &self.sourcing {
            ObjectSourcing::Direct(source) => source.source(user),
            ObjectSourcing::Pooled(pool) => pool.source_managed_object(user),
            ObjectSourcing::Bound(Some(object)) => user.set_object(object.clone()),
            ObjectSourcing::Bound(None) => user.fail(Cause::new(
                kinds::object_sourcing(),
                format!("no object was bound for '{}'", self.name),
            )),
        }
    }

    fn on_sourced(self: &Arc<Self>, result: SourceResult) {
        let mut inner = lock(&self.inner);
        if inner.released {
            drop(inner);
            if let Ok(object) = result {
                tracing::debug!(object = %self.name, "Object arrived after release");
                self.give_back(object, true);
            }
            return;
        }

        let waiters = match result {
            Ok(object) => {
                inner.object = Some(object.clone());
                if object.capabilities().asynchronous {
                    inner.state = ContainerState::AsyncPending;
                    drop(inner);
                    object.register_async_listener(AsyncListener {
                        container: Arc::downgrade(self),
                    });
                    return;
                }
                inner.state = ContainerState::Ready;
                std::mem::take(&mut inner.waiters)
            }
            Err(cause) => {
                tracing::debug!(object = %self.name, cause = %cause, "Managed object sourcing failed");
                inner.state = ContainerState::Failed;
                inner.failure = Some(Cause::wrapping(
                    kinds::object_sourcing(),
                    format!("failed to source managed object '{}'", self.name),
                    cause,
                ));
                std::mem::take(&mut inner.waiters)
            }
        };
        drop(inner);

        for waker in waiters {
            waker();
        }
    }

    fn give_back(&self, object: Arc<dyn ManagedObject>, reusable: bool) {
        if let ObjectSourcing::Pooled(pool) = &self.sourcing {
            if reusable {
                pool.return_managed_object(object);
            } else {
                pool.lost_managed_object();
            }
        }
    }

    /// Release the object at the end of its scope.
    ///
    /// A pooled instance goes back to its pool if it is ready; otherwise
    /// the pool is told it was lost.
    pub fn unload(&self) {
        let (object, state) = {
            let mut inner = lock(&self.inner);
            if inner.released {
                return;
            }
            inner.released = true;
            let state = inner.state;
            inner.state = ContainerState::Unloaded;
            inner.waiters.clear();
            (inner.object.take(), state)
        };

        if let Some(object) = object {
            self.give_back(object, state == ContainerState::Ready);
        }
        tracing::trace!(object = %self.name, "Managed object unloaded");
    }

    fn transition(&self, from: ContainerState, to: ContainerState, failure: Option<Cause>) -> bool {
        let waiters = {
            let mut inner = lock(&self.inner);
            if inner.released || inner.state != from {
                return false;
            }
            inner.state = to;
            if failure.is_some() {
                inner.failure = failure;
            }
            if to == ContainerState::AsyncPending {
                return true;
            }
            std::mem::take(&mut inner.waiters)
        };

        for waker in waiters {
            waker();
        }
        true
    }
}

/// Handed to asynchronous objects to signal their operations.
///
/// Holds only a weak reference: signals for a container that no longer
/// exists are ignored.
#[derive(Clone)]
pub struct AsyncListener {
    container: Weak<ManagedObjectContainer>,
}

impl AsyncListener {
    /// A new asynchronous operation started; users wait until `complete`.
    pub fn start(&self) {
        if let Some(container) = self.container.upgrade() {
            container.transition(ContainerState::Ready, ContainerState::AsyncPending, None);
        }
    }

    /// The pending operation completed.
    ///
    /// Only the first completion per started operation has an effect.
    pub fn complete(&self) {
        if let Some(container) = self.container.upgrade() {
            if !container.transition(ContainerState::AsyncPending, ContainerState::Ready, None) {
                tracing::warn!(object = %container.name, "Ignoring completion with no pending operation");
            }
        }
    }

    /// The pending operation failed.
    pub fn fail(&self, cause: Cause) {
        if let Some(container) = self.container.upgrade() {
            let cause = Cause::wrapping(
                kinds::object_sourcing(),
                format!("asynchronous operation of '{}' failed", container.name),
                cause,
            );
            container.transition(ContainerState::AsyncPending, ContainerState::Failed, Some(cause));
        }
    }
}
