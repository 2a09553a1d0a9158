//! Teams: pluggable worker pools.
//!
//! A [`Team`] executes assigned [`Job`]s. Strategies:
//! - [`PassiveTeam`]: inline on the assigning context
//! - [`ActiveTeam`]: dedicated workers pulling a shared queue
//! - [`LeaderFollowerTeam`]: idle workers woken one per job
//! - [`ContextBridgeTeam`]: the external caller drives its own processes

#![warn(missing_docs)]

pub mod job;
pub mod team;
pub mod passive;
pub mod active;
pub mod leader_follower;
pub mod bridge;
pub mod config;

#[cfg(test)]
pub(crate) mod testing;

pub use job::{run_inline, run_to_completion, Job, JobContext};
pub use team::{Team, TeamError};
pub use passive::PassiveTeam;
pub use active::ActiveTeam;
pub use leader_follower::LeaderFollowerTeam;
pub use bridge::ContextBridgeTeam;
pub use config::{build_team, BuiltTeam, TeamConfig, TeamKind};
