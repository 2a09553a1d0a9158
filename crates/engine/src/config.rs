//! Conductor configuration.

use crate::error::ConfigError;
use conductor_team::{TeamConfig, TeamKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Configuration of a [`Conductor`](crate::Conductor).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConductorConfig {
    /// Teams functions may be assigned to
    #[serde(default = "default_teams")]
    pub teams: Vec<TeamConfig>,

    /// Team used by functions that do not name one
    #[serde(default = "default_team_name")]
    pub default_team: String,

    /// Maximum steps a runner executes before yielding its worker
    #[serde(default = "default_runner_batch")]
    pub runner_batch: usize,
}

fn default_teams() -> Vec<TeamConfig> {
    vec![TeamConfig::new(default_team_name(), TeamKind::Passive)]
}

fn default_team_name() -> String {
    "passive".to_string()
}

fn default_runner_batch() -> usize {
    64
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            teams: default_teams(),
            default_team: default_team_name(),
            runner_batch: default_runner_batch(),
        }
    }
}

impl ConductorConfig {
    /// Parse a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        tracing::debug!(path = %path.display(), "Loading conductor configuration");
        Self::from_json(&json)
    }

    /// Add a team.
    pub fn with_team(mut self, team: TeamConfig) -> Self {
        self.teams.push(team);
        self
    }

    /// Set the default team.
    pub fn with_default_team(mut self, name: impl Into<String>) -> Self {
        self.default_team = name.into();
        self
    }

    /// Set the runner batch size.
    pub fn with_runner_batch(mut self, batch: usize) -> Self {
        self.runner_batch = batch;
        self
    }

    /// Check the configuration for consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runner_batch == 0 {
            return Err(ConfigError::InvalidBatch);
        }

        let mut names = HashSet::new();
        for team in &self.teams {
            if !names.insert(team.name.as_str()) {
                return Err(ConfigError::DuplicateTeam(team.name.clone()));
            }
            let needs_workers = matches!(team.kind, TeamKind::Active | TeamKind::LeaderFollower);
            if needs_workers && team.workers == 0 {
                return Err(ConfigError::NoWorkers(team.name.clone()));
            }
        }

        if !names.contains(self.default_team.as_str()) {
            return Err(ConfigError::UnknownDefaultTeam(self.default_team.clone()));
        }
        Ok(())
    }
}
