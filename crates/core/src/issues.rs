//! Configuration issue collection.
//!
//! Descriptors are validated when a scope is built. Problems are reported
//! to an [`IssueCollector`] rather than returned one at a time so that a
//! single pass reports everything wrong with a scope.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of asset an issue was raised against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    /// A section (scope) as a whole
    Section,
    /// A function
    Function,
    /// A flow descriptor
    Flow,
    /// A managed object
    Object,
    /// A team
    Team,
    /// An escalation entry
    Escalation,
}

/// A configuration problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Scope the issue belongs to
    pub scope: String,

    /// Kind of asset at fault
    pub asset: AssetKind,

    /// Name of the asset at fault
    pub name: String,

    /// Description of the problem
    pub message: String,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:?} '{}': {}", self.scope, self.asset, self.name, self.message)
    }
}

/// Receives configuration issues.
pub trait IssueCollector {
    /// Record an issue.
    fn add_issue(&mut self, issue: Issue);
}

/// Collects issues into a list.
#[derive(Debug, Default, Clone)]
pub struct Issues {
    issues: Vec<Issue>,
}

impl Issues {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any issue was recorded.
    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    /// Number of issues.
    pub fn len(&self) -> usize {
        self.issues.len()
    }

    /// Recorded issues.
    pub fn iter(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter()
    }

    /// Consume into the list of issues.
    pub fn into_vec(self) -> Vec<Issue> {
        self.issues
    }
}

impl IssueCollector for Issues {
    fn add_issue(&mut self, issue: Issue) {
        self.issues.push(issue);
    }
}

/// Logs each issue as a warning and forwards it.
pub struct LoggingIssues<'a> {
    inner: &'a mut dyn IssueCollector,
}

impl<'a> LoggingIssues<'a> {
    /// Wrap a collector.
    pub fn new(inner: &'a mut dyn IssueCollector) -> Self {
        Self { inner }
    }
}

impl IssueCollector for LoggingIssues<'_> {
    fn add_issue(&mut self, issue: Issue) {
        tracing::warn!(scope = %issue.scope, asset = ?issue.asset, name = %issue.name, "{}", issue.message);
        self.inner.add_issue(issue);
    }
}
