//! Flow descriptors.

use conductor_core::{Cause, TypeKey};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;

/// How an invoked function is continued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStrategy {
    /// Runs after the invoking function returns, on the same flow
    Sequential,

    /// Runs as a new flow of the same ThreadState
    Parallel,

    /// Runs in a new ThreadState of the same process
    Spawn,
}

/// A declared continuation to a function of the same section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowDescriptor {
    /// Name of the target function
    pub target: String,

    /// Type of the argument passed, if declared
    pub argument_type: Option<TypeKey>,

    /// Invocation strategy
    pub strategy: FlowStrategy,
}

impl FlowDescriptor {
    fn new(target: impl Into<String>, strategy: FlowStrategy) -> Self {
        Self {
            target: target.into(),
            argument_type: None,
            strategy,
        }
    }

    /// Sequential flow to `target`.
    pub fn sequential(target: impl Into<String>) -> Self {
        Self::new(target, FlowStrategy::Sequential)
    }

    /// Parallel flow to `target`.
    pub fn parallel(target: impl Into<String>) -> Self {
        Self::new(target, FlowStrategy::Parallel)
    }

    /// Flow to `target` in a new ThreadState.
    pub fn spawn(target: impl Into<String>) -> Self {
        Self::new(target, FlowStrategy::Spawn)
    }

    /// Declare the argument as the Rust type `T`.
    pub fn argument<T: Any>(self) -> Self {
        self.argument_key(TypeKey::of::<T>())
    }

    /// Declare the argument type.
    pub fn argument_key(mut self, key: impl Into<TypeKey>) -> Self {
        self.argument_type = Some(key.into());
        self
    }
}

/// Called once when a parallel flow or spawned ThreadState finishes.
///
/// Receives the cause when it ended through an unhandled escalation or
/// was abandoned.
pub type FlowCallback = Box<dyn FnOnce(Option<Arc<Cause>>) + Send>;
