//! Failure causes carried by escalations.

use crate::type_key::TypeKey;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Well-known cause kinds raised by the runtime itself.
pub mod kinds {
    use crate::type_key::TypeKey;

    /// Root of every runtime-raised kind.
    pub fn runtime() -> TypeKey {
        TypeKey::new("conductor")
    }

    /// A managed object could not be sourced.
    pub fn object_sourcing() -> TypeKey {
        runtime().child("object")
    }

    /// A function asked for an object it did not declare, or of the wrong type.
    pub fn object_access() -> TypeKey {
        runtime().child("object").child("access")
    }

    /// A process was cancelled through its handle.
    pub fn cancelled() -> TypeKey {
        runtime().child("cancelled")
    }

    /// A function parameter did not have the declared type.
    pub fn parameter() -> TypeKey {
        runtime().child("parameter")
    }
}

/// The failure routed through escalation procedures.
///
/// A cause has a hierarchical kind used for first-match lookup, a message,
/// and optionally the error it wraps.
#[derive(Clone)]
pub struct Cause {
    kind: TypeKey,
    message: String,
    source: Option<Arc<dyn Error + Send + Sync>>,
}

impl Cause {
    /// Create a cause of the given kind.
    pub fn new(kind: impl Into<TypeKey>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a cause wrapping an underlying error.
    pub fn from_error<E>(kind: impl Into<TypeKey>, error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            kind: kind.into(),
            message: error.to_string(),
            source: Some(Arc::new(error)),
        }
    }

    /// Wrap another cause, keeping it reachable through [`Error::source`].
    pub fn wrapping(kind: impl Into<TypeKey>, message: impl Into<String>, inner: Cause) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            source: Some(Arc::new(inner)),
        }
    }

    /// The kind used for escalation matching.
    pub fn kind(&self) -> &TypeKey {
        &self.kind
    }

    /// Human readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The wrapped cause, if this cause wraps another cause.
    pub fn inner(&self) -> Option<&Cause> {
        self.source
            .as_deref()
            .and_then(|source| (source as &(dyn Error + 'static)).downcast_ref::<Cause>())
    }

    /// The innermost cause in a wrapping chain.
    pub fn root(&self) -> &Cause {
        let mut current = self;
        while let Some(inner) = current.inner() {
            current = inner;
        }
        current
    }

    /// Whether this cause is an instance of `kind`.
    pub fn is_a(&self, kind: &TypeKey) -> bool {
        self.kind.is_assignable_to(kind)
    }
}

impl fmt::Debug for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cause")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .field("source", &self.source.as_ref().map(|s| s.to_string()))
            .finish()
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl Error for Cause {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_deref().map(|source| source as &(dyn Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct DiskFull;

    impl fmt::Display for DiskFull {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "disk full")
        }
    }

    impl Error for DiskFull {}

    #[test]
    fn test_cause_matches_supertypes() {
        let cause = Cause::new("io.timeout", "read timed out");
        assert!(cause.is_a(&TypeKey::new("io")));
        assert!(cause.is_a(&TypeKey::any()));
        assert!(!cause.is_a(&TypeKey::new("parse")));
    }

    #[test]
    fn test_wrapped_cause_keeps_original() {
        let original = Cause::new("db.connect", "refused");
        let wrapped = Cause::wrapping(kinds::object_sourcing(), "failed to source 'db'", original);

        assert!(wrapped.is_a(&kinds::object_sourcing()));
        assert_eq!(wrapped.inner().map(|c| c.message()), Some("refused"));
        assert_eq!(wrapped.root().kind(), &TypeKey::new("db.connect"));
        assert!(wrapped.source().is_some());
    }

    #[test]
    fn test_from_error_uses_error_message() {
        let cause = Cause::from_error("io", DiskFull);
        assert_eq!(cause.message(), "disk full");
        assert!(cause.inner().is_none());
        assert_eq!(cause.to_string(), "[io] disk full");
    }
}
