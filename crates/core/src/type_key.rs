//! Hierarchical type keys.
//!
//! Parameter contracts and escalation causes are both described by a
//! [`TypeKey`]: a dot-separated path where every prefix is a supertype of
//! the longer path. `"io"` is a supertype of `"io.timeout"`, and the empty
//! root key accepts everything.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A dot-separated hierarchical type name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeKey(String);

impl TypeKey {
    /// Create a key from a dot-separated path.
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        Self(path.trim_matches('.').to_string())
    }

    /// The root key, a supertype of every key.
    pub fn any() -> Self {
        Self(String::new())
    }

    /// Key named after a Rust type.
    ///
    /// Rust type names never contain dots, so the result is a direct child
    /// of the root.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self(std::any::type_name::<T>().to_string())
    }

    /// Append a child segment.
    pub fn child(&self, segment: &str) -> Self {
        if self.is_any() {
            Self::new(segment)
        } else {
            Self::new(format!("{}.{}", self.0, segment))
        }
    }

    /// Direct supertype, `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_any() {
            return None;
        }
        match self.0.rfind('.') {
            Some(index) => Some(Self(self.0[..index].to_string())),
            None => Some(Self::any()),
        }
    }

    /// Whether this is the root key.
    pub fn is_any(&self) -> bool {
        self.0.is_empty()
    }

    /// The dotted path.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether a value of this type may be passed where `target` is declared.
    pub fn is_assignable_to(&self, target: &TypeKey) -> bool {
        if target.is_any() || self.0 == target.0 {
            return true;
        }
        self.0.len() > target.0.len()
            && self.0.starts_with(target.0.as_str())
            && self.0.as_bytes()[target.0.len()] == b'.'
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_any() {
            write!(f, "*")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<&str> for TypeKey {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}
