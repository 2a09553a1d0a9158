//! Job contract.

use conductor_core::{ProcessId, TeamId};
use std::cell::RefCell;
use std::collections::VecDeque;

/// Context a team hands to every job it executes.
#[derive(Debug, Clone)]
pub struct JobContext {
    team: TeamId,
    team_name: String,
    worker: usize,
}

impl JobContext {
    /// Create a context for a worker of a team.
    pub fn new(team: TeamId, team_name: impl Into<String>, worker: usize) -> Self {
        Self {
            team,
            team_name: team_name.into(),
            worker,
        }
    }

    /// Team executing the job.
    pub fn team(&self) -> TeamId {
        self.team
    }

    /// Name of the team executing the job.
    pub fn team_name(&self) -> &str {
        &self.team_name
    }

    /// Index of the worker within its team.
    pub fn worker(&self) -> usize {
        self.worker
    }
}

/// A single schedulable execution step.
pub trait Job: Send + 'static {
    /// ProcessState the job belongs to.
    fn process_id(&self) -> ProcessId;

    /// Run the step.
    ///
    /// Returns `true` when the job is done and may be discarded, `false`
    /// to have the team run it again.
    fn do_job(&mut self, context: &JobContext) -> bool;
}

/// Run a job on the current context until it reports completion.
pub fn run_to_completion(job: &mut dyn Job, context: &JobContext) {
    while !job.do_job(context) {
        tracing::trace!(team = %context.team_name(), process_id = %job.process_id(), "Job requeued inline");
    }
}

type InlineQueue = VecDeque<(Box<dyn Job>, JobContext)>;

thread_local! {
    /// Jobs assigned inline while an inline drain is running on this thread.
    static INLINE: RefCell<Option<InlineQueue>> = const { RefCell::new(None) };
}

/// Installs a fresh inline queue and restores the enclosing one on exit.
struct InlineDrain {
    previous: Option<InlineQueue>,
}

impl InlineDrain {
    fn enter() -> Self {
        let previous = INLINE.with(|inline| inline.borrow_mut().replace(VecDeque::new()));
        Self { previous }
    }
}

impl Drop for InlineDrain {
    fn drop(&mut self) {
        let previous = self.previous.take();
        let abandoned = INLINE.with(|inline| std::mem::replace(&mut *inline.borrow_mut(), previous));
        // Only non-empty when unwinding; drop the jobs outside the borrow.
        drop(abandoned);
    }
}

/// Run a job on the current thread without growing the stack per hand-off.
///
/// The outermost call drains every job assigned inline while it runs, so
/// it returns only once they have all completed. A nested call, made from
/// a job already running inline on this thread, queues the job and returns
/// at once.
pub fn run_inline(job: Box<dyn Job>, context: JobContext) {
    let first = INLINE.with(|inline| match inline.borrow_mut().as_mut() {
        Some(queue) => {
            queue.push_back((job, context));
            None
        }
        None => Some((job, context)),
    });
    if let Some((job, context)) = first {
        drain_inline(job, context);
    }
}

/// Run `job` and everything it assigns inline, isolated from any drain
/// already in progress on this thread.
pub(crate) fn drain_inline(job: Box<dyn Job>, context: JobContext) {
    let _drain = InlineDrain::enter();
    let mut next = Some((job, context));
    while let Some((mut job, context)) = next {
        run_to_completion(job.as_mut(), &context);
        drop(job);
        next = INLINE.with(|inline| inline.borrow_mut().as_mut().and_then(|queue| queue.pop_front()));
    }
}
