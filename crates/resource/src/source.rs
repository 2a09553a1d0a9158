//! Sourcing of managed objects.

use crate::object::ManagedObject;
use conductor_core::Cause;
use std::fmt;
use std::sync::Arc;

/// Result of sourcing a managed object.
pub type SourceResult = Result<Arc<dyn ManagedObject>, Cause>;

/// Receives a sourced managed object.
///
/// Delivered exactly once, either during the `source` call or later from
/// any context.
pub struct ObjectUser {
    deliver: Box<dyn FnOnce(SourceResult) + Send>,
}

impl ObjectUser {
    /// Create a user from a delivery callback.
    pub fn new(deliver: impl FnOnce(SourceResult) + Send + 'static) -> Self {
        Self {
            deliver: Box::new(deliver),
        }
    }

    /// Deliver the object.
    pub fn set_object(self, object: Arc<dyn ManagedObject>) {
        (self.deliver)(Ok(object))
    }

    /// Report that the object could not be sourced.
    pub fn fail(self, cause: Cause) {
        (self.deliver)(Err(cause))
    }

    /// Deliver a result.
    pub fn deliver(self, result: SourceResult) {
        (self.deliver)(result)
    }
}

impl fmt::Debug for ObjectUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectUser").finish_non_exhaustive()
    }
}

/// Creates managed object instances.
///
/// Creation may complete asynchronously; implementations must not block
/// the caller waiting for it.
pub trait ManagedObjectSource: Send + Sync {
    /// Source a new instance for `user`.
    fn source(&self, user: ObjectUser);
}

/// Source creating instances synchronously from a closure.
pub struct FnSource<F> {
    create: F,
}

impl<F> FnSource<F>
where
    F: Fn() -> SourceResult + Send + Sync,
{
    /// Create a source from a closure.
    pub fn new(create: F) -> Self {
        Self { create }
    }
}

impl<F> ManagedObjectSource for FnSource<F>
where
    F: Fn() -> SourceResult + Send + Sync,
{
    fn source(&self, user: ObjectUser) {
        user.deliver((self.create)())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::PlainObject;
    use std::sync::Mutex;

    #[test]
    fn test_fn_source_delivers_synchronously() {
        let source = FnSource::new(|| Ok(Arc::new(PlainObject::new("conn")) as Arc<dyn ManagedObject>));
        let received = Arc::new(Mutex::new(None));
        let slot = received.clone();

        source.source(ObjectUser::new(move |result| {
            *slot.lock().unwrap() = Some(result.is_ok());
        }));

        assert_eq!(*received.lock().unwrap(), Some(true));
    }
}
