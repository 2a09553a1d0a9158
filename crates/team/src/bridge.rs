//! Team driving a process from the external caller's own context.
//!
//! An adapter calls [`ContextBridgeTeam::run_within`] around a process
//! invocation. The team, registered as a [`ProcessListener`], associates
//! every process created inside that call with the calling thread. Jobs of
//! those processes assigned to this team are handed back to the caller,
//! which blocks executing them until all its processes complete.

use crate::job::{drain_inline, run_inline, Job, JobContext};
use crate::team::{Team, TeamError};
use conductor_core::sync::lock;
use conductor_core::{ProcessId, ProcessListener, TeamId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

enum BridgeMessage {
    Job(Box<dyn Job>),
    Completed(ProcessId),
}

struct Caller {
    sender: mpsc::UnboundedSender<BridgeMessage>,
    outstanding: AtomicUsize,
}

thread_local! {
    static CURRENT_CALLER: RefCell<Option<Arc<Caller>>> = const { RefCell::new(None) };
}

/// Restores the previous caller when a (possibly nested) bridge call ends.
struct CallerScope {
    previous: Option<Arc<Caller>>,
}

impl CallerScope {
    fn enter(caller: Arc<Caller>) -> Self {
        let previous = CURRENT_CALLER.with(|current| current.borrow_mut().replace(caller));
        Self { previous }
    }
}

impl Drop for CallerScope {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_CALLER.with(|current| *current.borrow_mut() = previous);
    }
}

/// Associates an external caller's thread with the processes it creates.
///
/// Jobs for processes that have no associated caller run inline on the
/// assigning context.
pub struct ContextBridgeTeam {
    id: TeamId,
    name: String,
    callers: Mutex<HashMap<ProcessId, Arc<Caller>>>,
}

impl ContextBridgeTeam {
    /// Create a bridge team.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: TeamId::new(),
            name: name.into(),
            callers: Mutex::new(HashMap::new()),
        }
    }

    /// Run `invoke` and then execute, on this thread, the jobs of every
    /// process it created until they have all completed.
    ///
    /// Blocks the calling thread, so it must not be called from within an
    /// async runtime.
    pub fn run_within<R>(&self, invoke: impl FnOnce() -> R) -> R {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let caller = Arc::new(Caller {
            sender,
            outstanding: AtomicUsize::new(0),
        });

        let result = {
            let _scope = CallerScope::enter(caller.clone());
            invoke()
        };

        let context = JobContext::new(self.id, &self.name, 0);
        while caller.outstanding.load(Ordering::SeqCst) > 0 {
            match receiver.blocking_recv() {
                Some(BridgeMessage::Job(job)) => drain_inline(job, context.clone()),
                Some(BridgeMessage::Completed(process)) => {
                    caller.outstanding.fetch_sub(1, Ordering::SeqCst);
                    tracing::debug!(team = %self.name, process_id = %process, "Bridged process completed");
                }
                None => break,
            }
        }

        result
    }

    /// Processes currently associated with a caller.
    pub fn bridged_processes(&self) -> usize {
        lock(&self.callers).len()
    }
}

impl Team for ContextBridgeTeam {
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
        let caller = lock(&self.callers).get(&job.process_id()).cloned();
        match caller {
            Some(caller) => {
                if let Err(mpsc::error::SendError(BridgeMessage::Job(job))) =
                    caller.sender.send(BridgeMessage::Job(job))
                {
                    run_inline(job, JobContext::new(self.id, &self.name, 0));
                }
            }
            None => run_inline(job, JobContext::new(self.id, &self.name, 0)),
        }
    }

    fn stop_working(&self) {}
}

impl ProcessListener for ContextBridgeTeam {
    fn process_created(&self, process: ProcessId) {
        let caller = CURRENT_CALLER.with(|current| current.borrow().clone());
        if let Some(caller) = caller {
            caller.outstanding.fetch_add(1, Ordering::SeqCst);
            lock(&self.callers).insert(process, caller);
            tracing::debug!(team = %self.name, process_id = %process, "Process bridged to caller");
        }
    }

    fn process_completed(&self, process: ProcessId) {
        if let Some(caller) = lock(&self.callers).remove(&process) {
            let _ = caller.sender.send(BridgeMessage::Completed(process));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::CountdownJob;

    #[test]
    fn test_jobs_run_on_caller_thread() {
        let team = Arc::new(ContextBridgeTeam::new("bridge"));
        let caller_thread = std::thread::current().id();
        let process = ProcessId::new();
        let ran_on = Arc::new(Mutex::new(None));

        struct Recorder {
            process: ProcessId,
            ran_on: Arc<Mutex<Option<std::thread::ThreadId>>>,
            team: Arc<ContextBridgeTeam>,
        }
        impl Job for Recorder {
            fn process_id(&self) -> ProcessId {
                self.process
            }
            fn do_job(&mut self, _context: &JobContext) -> bool {
                *self.ran_on.lock().unwrap() = Some(std::thread::current().id());
                self.team.process_completed(self.process);
                true
            }
        }

        let job = Recorder {
            process,
            ran_on: ran_on.clone(),
            team: team.clone(),
        };
        let worker_team = team.clone();

        team.run_within(|| {
            worker_team.process_created(process);
            // Assigned from another thread, executed back on the caller.
            let assigner = worker_team.clone();
            std::thread::spawn(move || assigner.assign_job(Box::new(job), None))
                .join()
                .unwrap();
        });

        assert_eq!(*ran_on.lock().unwrap(), Some(caller_thread));
        assert_eq!(team.bridged_processes(), 0);
    }

    #[test]
    fn test_unbridged_process_runs_inline() {
        let team = ContextBridgeTeam::new("bridge");
        let runs = Arc::new(AtomicUsize::new(0));
        team.assign_job(Box::new(CountdownJob::new(5, runs.clone(), None)), None);
        assert_eq!(runs.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_run_within_without_process_returns_immediately() {
        let team = ContextBridgeTeam::new("bridge");
        assert_eq!(team.run_within(|| 42), 42);
    }
}
