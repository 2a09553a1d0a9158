//! Engine error types.

use conductor_core::{ProcessId, TypeKey};
use conductor_team::TeamError;
use std::path::PathBuf;
use thiserror::Error;

/// Invalid conductor configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("Failed to read {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    /// Configuration is not valid JSON for [`crate::ConductorConfig`]
    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// Two teams share a name
    #[error("Team '{0}' is declared more than once")]
    DuplicateTeam(String),

    /// A threaded team was configured with zero workers
    #[error("Team '{0}' needs at least one worker")]
    NoWorkers(String),

    /// The default team is not among the declared teams
    #[error("Default team '{0}' is not declared")]
    UnknownDefaultTeam(String),

    /// `runner_batch` is zero
    #[error("runner_batch must be at least 1")]
    InvalidBatch,

    /// A team could not be built
    #[error(transparent)]
    Team(#[from] TeamError),
}

/// Failure to open or configure a conductor.
#[derive(Debug, Error)]
pub enum ConductorError {
    /// `open` was called on an open conductor
    #[error("Conductor is already open")]
    AlreadyOpen,

    /// The conductor was closed and cannot be reopened
    #[error("Conductor is closed")]
    Closed,

    /// Runtime for delayed invocations could not be created
    #[error("Failed to start timer runtime: {0}")]
    Timer(#[source] std::io::Error),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A team failed to start
    #[error(transparent)]
    Team(#[from] TeamError),
}

/// A process could not be invoked.
#[derive(Debug, Error)]
pub enum InvokeError {
    /// The section is not open, or its conductor was closed
    #[error("Section '{0}' is not open")]
    NotOpen(String),

    /// No function of that name in the section
    #[error("Function '{1}' not found in section '{0}'")]
    UnknownFunction(String, String),

    /// The argument type is not assignable to the function's parameter
    #[error("Function '{function}' expects {expected}, got {actual}")]
    ParameterType {
        /// Invoked function
        function: String,
        /// Declared parameter type
        expected: TypeKey,
        /// Type of the supplied argument
        actual: TypeKey,
    },

    /// Bound object name is not an input slot of the section
    #[error("Object '{0}' is not a process input of this section")]
    UnknownInput(String),

    /// The process was dropped without reporting completion
    #[error("Process {0} ended without reporting completion")]
    Abandoned(ProcessId),
}
