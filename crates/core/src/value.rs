//! Dynamically typed values passed between functions.

use std::any::Any;
use std::sync::Arc;

/// A shareable value of any type.
pub type Value = Arc<dyn Any + Send + Sync>;

/// Wrap a value.
pub fn value<T: Any + Send + Sync>(inner: T) -> Value {
    Arc::new(inner)
}
