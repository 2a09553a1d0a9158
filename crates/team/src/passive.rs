//! Inline team.

use crate::job::{run_inline, Job, JobContext};
use crate::team::{Team, TeamError};
use conductor_core::TeamId;

/// Executes each job synchronously on the assigning context.
///
/// Used for deterministic single-threaded execution: no worker hand-off
/// happens, so a chain of functions on a passive team completes before
/// the outermost `assign_job` returns. Jobs assigned from a job already
/// running inline are queued behind it on the same thread.
pub struct PassiveTeam {
    id: TeamId,
    name: String,
}

impl PassiveTeam {
    /// Create a passive team.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: TeamId::new(),
            name: name.into(),
        }
    }
}

impl Team for PassiveTeam {
    fn id(&self) -> TeamId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn start_working(&self) -> Result<(), TeamError> {
        Ok(())
    }

    fn assign_job(&self, job: Box<dyn Job>, _assigner: Option<TeamId>) {
        run_inline(job, JobContext::new(self.id, &self.name, 0));
    }

    fn stop_working(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::CountdownJob;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_passive_runs_inline_until_complete() {
        let team = PassiveTeam::new("passive");
        let runs = Arc::new(AtomicUsize::new(0));

        team.assign_job(Box::new(CountdownJob::new(1_000_000, runs.clone(), None)), None);

        // Completed before assign_job returned.
        assert_eq!(runs.load(Ordering::SeqCst), 1_000_001);
    }

    #[test]
    fn test_passive_reports_its_identity() {
        let team = PassiveTeam::new("inline");
        let seen = Arc::new(std::sync::Mutex::new(None));
        let captured = seen.clone();

        struct Probe(Arc<std::sync::Mutex<Option<TeamId>>>);
        impl Job for Probe {
            fn process_id(&self) -> conductor_core::ProcessId {
                conductor_core::ProcessId::new()
            }
            fn do_job(&mut self, context: &JobContext) -> bool {
                *self.0.lock().unwrap() = Some(context.team());
                true
            }
        }

        team.assign_job(Box::new(Probe(captured)), None);
        assert_eq!(*seen.lock().unwrap(), Some(team.id()));
        assert_eq!(team.name(), "inline");
    }

    /// Hands itself to the other team until `remaining` reaches zero.
    struct Alternate {
        process: conductor_core::ProcessId,
        teams: [Arc<PassiveTeam>; 2],
        remaining: usize,
        runs: Arc<AtomicUsize>,
    }

    impl Job for Alternate {
        fn process_id(&self) -> conductor_core::ProcessId {
            self.process
        }

        fn do_job(&mut self, context: &JobContext) -> bool {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.remaining > 0 {
                let other = if context.team() == self.teams[0].id() { 1 } else { 0 };
                self.teams[other].assign_job(
                    Box::new(Alternate {
                        process: self.process,
                        teams: self.teams.clone(),
                        remaining: self.remaining - 1,
                        runs: self.runs.clone(),
                    }),
                    Some(context.team()),
                );
            }
            true
        }
    }

    #[test]
    fn test_alternating_passive_teams_do_not_grow_the_stack() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counted = runs.clone();

        std::thread::Builder::new()
            .stack_size(256 * 1024)
            .spawn(move || {
                let teams = [Arc::new(PassiveTeam::new("left")), Arc::new(PassiveTeam::new("right"))];
                let job = Alternate {
                    process: conductor_core::ProcessId::new(),
                    teams: teams.clone(),
                    remaining: 20_000,
                    runs: counted.clone(),
                };
                teams[0].assign_job(Box::new(job), None);
                // Every hand-off ran before the outermost assignment returned.
                assert_eq!(counted.load(Ordering::SeqCst), 20_001);
            })
            .unwrap()
            .join()
            .unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 20_001);
    }
}
