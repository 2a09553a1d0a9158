//! Leader/follower team.

use crate::job::{run_inline, Job, JobContext};
use crate::team::{Team, TeamError, TeamState};
use conductor_core::sync::lock;
use conductor_core::TeamId;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::runtime::Runtime;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

type PendingJobs = Arc<Mutex<VecDeque<Box<dyn Job>>>>;

/// Workers wait idle until woken; each assignment wakes one idle worker.
///
/// A worker that takes a job while more jobs are pending promotes the next
/// follower before running its own job.
pub struct LeaderFollowerTeam {
    id: TeamId,
    name: String,
    workers: usize,
    pending: PendingJobs,
    wake: Arc<Notify>,
    runtime: Mutex<Option<Runtime>>,
    state: Mutex<TeamState>,
    stop: CancellationToken,
}

impl LeaderFollowerTeam {
    /// Create a team with the given number of workers.
    pub fn new(name: impl Into<String>, workers: usize) -> Self {
        Self {
            id: TeamId::new(),
            name: name.into(),
            workers: workers.max(1),
            pending: Arc::new(Mutex::new(VecDeque::new())),
            wake: Arc::new(Notify::new()),
            runtime: Mutex::new(None),
            state: Mutex::new(TeamState::Idle),
            stop: CancellationToken::new(),
        }
    }

    /// Jobs waiting for a worker.
    pub fn pending(&self) -> usize {
        lock(&self.pending).len()
    }

    async fn worker_loop(
        context: JobContext,
        pending: PendingJobs,
        wake: Arc<Notify>,
        stop: CancellationToken,
    ) {
        loop {
            let next = {
                let mut queue = lock(&pending);
                let job = queue.pop_front();
                if job.is_some() && !queue.is_empty() {
                    wake.notify_one();
                }
                job
            };

            match next {
                Some(mut job) => {
                    if !job.do_job(&context) {
                        lock(&pending).push_back(job);
                        wake.notify_one();
                        tokio::task::yield_now().await;
                    }
                }
                None => {
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = wake.notified() => {}
                    }
                }
            }
        }
    }
}

impl Team for LeaderFollowerTeam {
    fn id(&self) -> TeamId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn start_working(&self) -> Result<(), TeamError> {
        let mut state = lock(&self.state);
        if *state != TeamState::Idle {
            return Ok(());
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.workers)
            .thread_name(format!("{}-follower", self.name))
            .enable_all()
            .build()
            .map_err(|e| TeamError::Runtime(self.name.clone(), e))?;

        for worker in 0..self.workers {
            runtime.spawn(Self::worker_loop(
                JobContext::new(self.id, &self.name, worker),
                self.pending.clone(),
                self.wake.clone(),
                self.stop.clone(),
            ));
        }

        *lock(&self.runtime) = Some(runtime);
        *state = TeamState::Working;

        tracing::info!(team = %self.name, workers = self.workers, "Leader/follower team started");
        Ok(())
    }

    fn assign_job(&self, job: Box<dyn Job>, assigner: Option<TeamId>) {
        if *lock(&self.state) == TeamState::Stopped {
            tracing::warn!(team = %self.name, "Team stopped, running job on assigning context");
            run_inline(job, JobContext::new(self.id, &self.name, 0));
            return;
        }

        tracing::trace!(team = %self.name, assigner = ?assigner, process_id = %job.process_id(), "Job assigned");
        lock(&self.pending).push_back(job);
        self.wake.notify_one();
    }

    fn stop_working(&self) {
        {
            let mut state = lock(&self.state);
            if *state == TeamState::Stopped {
                return;
            }
            *state = TeamState::Stopped;
        }
        self.stop.cancel();

        if let Some(runtime) = lock(&self.runtime).take() {
            runtime.shutdown_background();
        }

        let abandoned: Vec<Box<dyn Job>> = lock(&self.pending).drain(..).collect();
        if !abandoned.is_empty() {
            tracing::warn!(team = %self.name, abandoned = abandoned.len(), "Team stopped with jobs pending");
        }
        drop(abandoned);
        tracing::info!(team = %self.name, "Leader/follower team stopped");
    }
}

impl Drop for LeaderFollowerTeam {
    fn drop(&mut self) {
        self.stop.cancel();
        if let Some(runtime) = lock(&self.runtime).take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::CountdownJob;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    #[test]
    fn test_single_job_repeats_until_complete() {
        let team = LeaderFollowerTeam::new("lf", 3);
        team.start_working().unwrap();

        let runs = Arc::new(AtomicUsize::new(0));
        let (done, finished) = oneshot::channel();
        team.assign_job(
            Box::new(CountdownJob::new(1_000_000, runs.clone(), Some(done))),
            None,
        );

        finished.blocking_recv().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1_000_001);
        team.stop_working();
    }

    #[test]
    fn test_concurrent_jobs_all_complete() {
        let team = LeaderFollowerTeam::new("lf", 4);
        team.start_working().unwrap();

        let runs = Arc::new(AtomicUsize::new(0));
        let receivers: Vec<_> = (0..50)
            .map(|_| {
                let (done, finished) = oneshot::channel();
                team.assign_job(
                    Box::new(CountdownJob::new(5_000, runs.clone(), Some(done))),
                    None,
                );
                finished
            })
            .collect();

        for finished in receivers {
            finished.blocking_recv().unwrap();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 50 * 5_001);
        assert_eq!(team.pending(), 0);
        team.stop_working();
    }

    #[test]
    fn test_stop_drops_pending_jobs() {
        let team = LeaderFollowerTeam::new("never-started", 2);
        let dropped = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            team.assign_job(Box::new(crate::testing::StuckJob::new(dropped.clone())), None);
        }
        assert_eq!(dropped.load(Ordering::SeqCst), 0);

        team.stop_working();
        assert_eq!(dropped.load(Ordering::SeqCst), 3);
    }
}
