//! The conductor: explicitly constructed runtime context.
//!
//! Owns the teams, process listeners, the platform escalation handler, the
//! timer for delayed invocations and the shutdown hooks. Sections are added
//! while configuring and validated by [`Conductor::open`].

use crate::config::ConductorConfig;
use crate::error::{ConductorError, ConfigError};
use crate::process::{ProcessHandle, ProcessInput};
use crate::section::{Section, SectionBuilder};
use conductor_core::{
    Issue, Issues, IssueCollector, LoggingEscalationHandler, LoggingIssues, PlatformEscalationHandler,
    ProcessListener,
};
use conductor_team::{build_team, Team};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::{Handle, Runtime};

/// Services shared by every open section.
pub(crate) struct Platform {
    pub(crate) teams: HashMap<String, Arc<dyn Team>>,
    pub(crate) default_team: String,
    pub(crate) listeners: Vec<Arc<dyn ProcessListener>>,
    pub(crate) escalation_handler: Arc<dyn PlatformEscalationHandler>,
    pub(crate) runner_batch: usize,
    pub(crate) timer: Handle,
    open: AtomicBool,
}

impl Platform {
    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Outcome of opening a conductor.
#[derive(Debug, Default)]
pub struct OpenReport {
    /// Sections that opened
    pub opened: Vec<String>,

    /// Sections kept closed because of configuration issues
    pub rejected: Vec<String>,

    /// Processes started for startup functions
    pub startup: Vec<ProcessHandle>,

    /// Issues found while validating, when opened with [`Conductor::open`]
    pub issues: Vec<Issue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConductorState {
    Configuring,
    Open,
    Closed,
}

/// Runtime context of a set of sections.
pub struct Conductor {
    config: ConductorConfig,
    teams: Vec<(String, Arc<dyn Team>)>,
    listeners: Vec<Arc<dyn ProcessListener>>,
    escalation_handler: Arc<dyn PlatformEscalationHandler>,
    pending: Vec<SectionBuilder>,
    shutdown_hooks: Vec<Box<dyn FnOnce() + Send>>,
    sections: HashMap<String, Arc<Section>>,
    platform: Option<Arc<Platform>>,
    timer: Option<Runtime>,
    state: ConductorState,
}

impl Conductor {
    /// Create a conductor, building the configured teams.
    pub fn new(config: ConductorConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut conductor = Self {
            teams: Vec::new(),
            listeners: Vec::new(),
            escalation_handler: Arc::new(LoggingEscalationHandler),
            pending: Vec::new(),
            shutdown_hooks: Vec::new(),
            sections: HashMap::new(),
            platform: None,
            timer: None,
            state: ConductorState::Configuring,
            config,
        };

        for team_config in conductor.config.teams.clone() {
            let built = build_team(&team_config)?;
            if let Some(listener) = built.listener {
                conductor.listeners.push(listener);
            }
            conductor.teams.push((team_config.name.clone(), built.team));
        }
        Ok(conductor)
    }

    /// Configuration the conductor was created with.
    pub fn config(&self) -> &ConductorConfig {
        &self.config
    }

    /// Add a team built outside the configuration.
    pub fn register_team(&mut self, team: Arc<dyn Team>) -> Result<(), ConfigError> {
        let name = team.name().to_string();
        if self.teams.iter().any(|(existing, _)| *existing == name) {
            return Err(ConfigError::DuplicateTeam(name));
        }
        self.teams.push((name, team));
        Ok(())
    }

    /// Team by name.
    pub fn team(&self, name: &str) -> Option<Arc<dyn Team>> {
        self.teams
            .iter()
            .find(|(team, _)| team == name)
            .map(|(_, team)| team.clone())
    }

    /// Observe process creation and completion.
    pub fn add_process_listener(&mut self, listener: Arc<dyn ProcessListener>) {
        self.listeners.push(listener);
    }

    /// Replace the platform escalation handler.
    pub fn set_escalation_handler(&mut self, handler: Arc<dyn PlatformEscalationHandler>) {
        self.escalation_handler = handler;
    }

    /// Add a section to open.
    pub fn add_section(&mut self, section: SectionBuilder) {
        self.pending.push(section);
    }

    /// Run `hook` when the conductor closes.
    ///
    /// Hooks run in reverse registration order.
    pub fn on_shutdown(&mut self, hook: impl FnOnce() + Send + 'static) {
        self.shutdown_hooks.push(Box::new(hook));
    }

    /// Open, collecting configuration issues into the report log.
    pub fn open(&mut self) -> Result<OpenReport, ConductorError> {
        let mut issues = Issues::new();
        let mut report = self.open_with(&mut issues)?;
        report.issues = issues.into_vec();
        Ok(report)
    }

    /// Start the teams, validate the sections and run startup functions.
    ///
    /// A section with issues stays closed; the others open.
    pub fn open_with(&mut self, issues: &mut dyn IssueCollector) -> Result<OpenReport, ConductorError> {
        match self.state {
            ConductorState::Configuring => {}
            ConductorState::Open => return Err(ConductorError::AlreadyOpen),
            ConductorState::Closed => return Err(ConductorError::Closed),
        }

        for (_, team) in &self.teams {
            team.start_working()?;
        }

        let timer = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("conductor-timer")
            .enable_time()
            .build()
            .map_err(ConductorError::Timer)?;

        let platform = Arc::new(Platform {
            teams: self.teams.iter().cloned().collect(),
            default_team: self.config.default_team.clone(),
            listeners: self.listeners.clone(),
            escalation_handler: self.escalation_handler.clone(),
            runner_batch: self.config.runner_batch,
            timer: timer.handle().clone(),
            open: AtomicBool::new(true),
        });
        self.timer = Some(timer);
        self.platform = Some(platform.clone());
        self.state = ConductorState::Open;

        let mut report = OpenReport::default();
        let mut logging = LoggingIssues::new(issues);
        for builder in std::mem::take(&mut self.pending) {
            let name = builder.name().to_string();
            match builder.build(&platform, &mut logging) {
                Some(section) => {
                    self.sections.insert(name.clone(), section);
                    report.opened.push(name);
                }
                None => report.rejected.push(name),
            }
        }

        for name in &report.opened {
            let section = &self.sections[name];
            for function in section.startup_functions() {
                match section.invoke_process(function, ProcessInput::new()) {
                    Ok(handle) => report.startup.push(handle),
                    Err(e) => tracing::error!(section = %name, function, error = %e, "Startup function failed to start"),
                }
            }
        }

        tracing::info!(
            sections = report.opened.len(),
            rejected = report.rejected.len(),
            teams = self.teams.len(),
            "Conductor open"
        );
        Ok(report)
    }

    /// Open section by name.
    pub fn section(&self, name: &str) -> Option<Arc<Section>> {
        self.sections.get(name).cloned()
    }

    /// Whether the conductor is open.
    pub fn is_open(&self) -> bool {
        self.state == ConductorState::Open
    }

    /// Stop the teams, run shutdown hooks and release the timer.
    ///
    /// Delayed processes that have not started, and jobs still queued on
    /// a stopped team, end their processes as cancelled.
    pub fn close(&mut self) {
        if self.state == ConductorState::Closed {
            return;
        }
        self.state = ConductorState::Closed;

        if let Some(platform) = self.platform.take() {
            platform.open.store(false, Ordering::SeqCst);
        }
        for (_, team) in &self.teams {
            team.stop_working();
        }
        while let Some(hook) = self.shutdown_hooks.pop() {
            hook();
        }
        if let Some(timer) = self.timer.take() {
            timer.shutdown_background();
        }
        self.sections.clear();

        tracing::info!("Conductor closed");
    }
}

impl Drop for Conductor {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_team::PassiveTeam;

    #[test]
    fn test_register_duplicate_team_rejected() {
        let mut conductor = Conductor::new(ConductorConfig::default()).unwrap();
        let err = conductor
            .register_team(Arc::new(PassiveTeam::new("passive")))
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateTeam(name) if name == "passive"));

        conductor.register_team(Arc::new(PassiveTeam::new("inline"))).unwrap();
        assert!(conductor.team("inline").is_some());
        assert!(conductor.team("missing").is_none());
    }

    #[test]
    fn test_open_once_and_close_idempotent() {
        let mut conductor = Conductor::new(ConductorConfig::default()).unwrap();
        assert!(!conductor.is_open());

        let report = conductor.open().unwrap();
        assert!(report.opened.is_empty());
        assert!(conductor.is_open());
        assert!(matches!(conductor.open(), Err(ConductorError::AlreadyOpen)));

        conductor.close();
        conductor.close();
        assert!(!conductor.is_open());
        assert!(matches!(conductor.open(), Err(ConductorError::Closed)));
    }
}
