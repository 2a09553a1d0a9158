//! Unique identifiers for runtime entities.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique identifier for a ProcessState.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessId(Ulid);

impl ProcessId {
    /// Generate a new ProcessId
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ProcessId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for ProcessId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Unique identifier for a ThreadState
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadStateId(Ulid);

impl ThreadStateId {
    /// Generate a new ThreadStateId
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ThreadStateId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ThreadStateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for ThreadStateId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Unique identifier for a Team
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TeamId(Ulid);

impl TeamId {
    /// Generate a new TeamId
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for TeamId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TeamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for TeamId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_id_round_trips_through_display() {
        let id = ProcessId::new();
        let parsed: ProcessId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_thread_and_team_ids_parse() {
        let thread = ThreadStateId::new();
        assert_eq!(thread.to_string().parse::<ThreadStateId>().unwrap(), thread);

        let team = TeamId::new();
        assert_eq!(team.to_string().parse::<TeamId>().unwrap(), team);

        assert!("not-a-ulid".parse::<TeamId>().is_err());
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(TeamId::new(), TeamId::new());
        assert_ne!(ThreadStateId::new(), ThreadStateId::new());
    }
}
