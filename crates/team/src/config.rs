//! Team assignment configuration.

use crate::active::ActiveTeam;
use crate::bridge::ContextBridgeTeam;
use crate::leader_follower::LeaderFollowerTeam;
use crate::passive::PassiveTeam;
use crate::team::{Team, TeamError};
use conductor_core::ProcessListener;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Worker strategy of a team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamKind {
    /// Executes inline on the assigning context
    Passive,
    /// Dedicated workers pulling a shared queue
    Active,
    /// Idle workers woken one per job
    LeaderFollower,
    /// Jobs executed by the external caller that invoked the process
    ContextBridge,
}

/// Configuration of one team.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamConfig {
    /// Team name functions are assigned to
    pub name: String,

    /// Worker strategy
    pub kind: TeamKind,

    /// Number of workers (active and leader/follower teams)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Strategy specific properties
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

fn default_workers() -> usize {
    1
}

impl TeamConfig {
    /// Create a configuration.
    pub fn new(name: impl Into<String>, kind: TeamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            workers: default_workers(),
            properties: HashMap::new(),
        }
    }

    /// Set the number of workers.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set a property.
    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// A team built from configuration.
pub struct BuiltTeam {
    /// The team
    pub team: Arc<dyn Team>,

    /// Set when the team must observe process lifecycles
    pub listener: Option<Arc<dyn ProcessListener>>,
}

/// Property naming worker threads of an active team.
pub const THREAD_PREFIX_PROPERTY: &str = "thread_prefix";

/// Build a team from its configuration.
pub fn build_team(config: &TeamConfig) -> Result<BuiltTeam, TeamError> {
    if config.name.trim().is_empty() {
        return Err(TeamError::InvalidConfig(
            config.name.clone(),
            "team name must not be empty".to_string(),
        ));
    }

    let needs_workers = matches!(config.kind, TeamKind::Active | TeamKind::LeaderFollower);
    if needs_workers && config.workers == 0 {
        return Err(TeamError::InvalidConfig(
            config.name.clone(),
            "workers must be at least 1".to_string(),
        ));
    }

    let built = match config.kind {
        TeamKind::Passive => BuiltTeam {
            team: Arc::new(PassiveTeam::new(&config.name)),
            listener: None,
        },
        TeamKind::Active => {
            let mut team = ActiveTeam::new(&config.name, config.workers);
            if let Some(prefix) = config.properties.get(THREAD_PREFIX_PROPERTY) {
                team = team.with_thread_prefix(prefix);
            }
            BuiltTeam {
                team: Arc::new(team),
                listener: None,
            }
        }
        TeamKind::LeaderFollower => BuiltTeam {
            team: Arc::new(LeaderFollowerTeam::new(&config.name, config.workers)),
            listener: None,
        },
        TeamKind::ContextBridge => {
            let team = Arc::new(ContextBridgeTeam::new(&config.name));
            BuiltTeam {
                team: team.clone(),
                listener: Some(team),
            }
        }
    };

    tracing::debug!(team = %config.name, kind = ?config.kind, workers = config.workers, "Team built");
    Ok(built)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_team_config() {
        let json = r#"{
            "name": "workers",
            "kind": "leader_follower",
            "workers": 4,
            "properties": { "note": "io bound" }
        }"#;
        let config: TeamConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.name, "workers");
        assert_eq!(config.kind, TeamKind::LeaderFollower);
        assert_eq!(config.workers, 4);
        assert_eq!(config.properties.get("note").map(String::as_str), Some("io bound"));
    }

    #[test]
    fn test_workers_default_to_one() {
        let config: TeamConfig = serde_json::from_str(r#"{"name":"a","kind":"active"}"#).unwrap();
        assert_eq!(config.workers, 1);
    }

    #[test]
    fn test_build_rejects_zero_workers() {
        let config = TeamConfig::new("broken", TeamKind::Active).workers(0);
        assert!(matches!(build_team(&config), Err(TeamError::InvalidConfig(..))));
    }

    #[test]
    fn test_bridge_team_is_also_a_listener() {
        let built = build_team(&TeamConfig::new("bridge", TeamKind::ContextBridge)).unwrap();
        assert!(built.listener.is_some());
        assert_eq!(built.team.name(), "bridge");

        let passive = build_team(&TeamConfig::new("inline", TeamKind::Passive)).unwrap();
        assert!(passive.listener.is_none());
    }
}
