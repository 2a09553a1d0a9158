//! Team contract.

use crate::job::Job;
use conductor_core::TeamId;
use thiserror::Error;

/// Error type for team operations.
#[derive(Debug, Error)]
pub enum TeamError {
    /// Worker runtime could not be created
    #[error("Team '{0}' failed to start workers: {1}")]
    Runtime(String, #[source] std::io::Error),

    /// Team configuration is invalid
    #[error("Invalid team configuration for '{0}': {1}")]
    InvalidConfig(String, String),
}

/// Pluggable worker pool executing assigned jobs.
///
/// `assign_job` may be called concurrently from jobs running on any team.
/// A job returning `false` from [`Job::do_job`] is run again by the team;
/// no assigned job is dropped while the team is working.
pub trait Team: Send + Sync {
    /// Team identity.
    fn id(&self) -> TeamId;

    /// Configured team name.
    fn name(&self) -> &str;

    /// Start the workers.
    fn start_working(&self) -> Result<(), TeamError>;

    /// Assign a job. `assigner` is the team whose job made the assignment.
    fn assign_job(&self, job: Box<dyn Job>, assigner: Option<TeamId>);

    /// Stop the workers.
    fn stop_working(&self);
}

/// Lifecycle of a team's workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TeamState {
    Idle,
    Working,
    Stopped,
}
