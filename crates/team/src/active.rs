//! Team of dedicated workers pulling a shared queue.

use crate::job::{run_inline, Job, JobContext};
use crate::team::{Team, TeamError, TeamState};
use conductor_core::sync::lock;
use conductor_core::TeamId;
use std::sync::{Arc, Mutex};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

type JobQueue = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Box<dyn Job>>>>;

/// Worker pool backed by a dedicated multi-thread runtime.
///
/// Each worker is a task that takes the next job from a shared FIFO queue.
/// A job that is not complete goes to the back of the queue so other jobs
/// get a turn. Jobs assigned before `start_working` wait in the queue.
pub struct ActiveTeam {
    id: TeamId,
    name: String,
    workers: usize,
    thread_prefix: String,
    sender: mpsc::UnboundedSender<Box<dyn Job>>,
    receiver: JobQueue,
    runtime: Mutex<Option<Runtime>>,
    state: Mutex<TeamState>,
    stop: CancellationToken,
}

impl ActiveTeam {
    /// Create a team with the given number of workers.
    pub fn new(name: impl Into<String>, workers: usize) -> Self {
        let name = name.into();
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            id: TeamId::new(),
            thread_prefix: name.clone(),
            name,
            workers: workers.max(1),
            sender,
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            runtime: Mutex::new(None),
            state: Mutex::new(TeamState::Idle),
            stop: CancellationToken::new(),
        }
    }

    /// Set the prefix used to name worker threads.
    pub fn with_thread_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_prefix = prefix.into();
        self
    }

    /// Number of workers.
    pub fn workers(&self) -> usize {
        self.workers
    }

    async fn worker_loop(
        context: JobContext,
        receiver: JobQueue,
        sender: mpsc::UnboundedSender<Box<dyn Job>>,
        stop: CancellationToken,
    ) {
        tracing::debug!(team = %context.team_name(), worker = context.worker(), "Worker started");

        loop {
            let next = {
                let mut queue = receiver.lock().await;
                tokio::select! {
                    _ = stop.cancelled() => None,
                    job = queue.recv() => job,
                }
            };

            let Some(mut job) = next else {
                break;
            };

            if job.do_job(&context) {
                continue;
            }

            tracing::trace!(team = %context.team_name(), process_id = %job.process_id(), "Job requeued");
            if let Err(mpsc::error::SendError(job)) = sender.send(job) {
                run_inline(job, context.clone());
            }
            tokio::task::yield_now().await;
        }

        tracing::debug!(team = %context.team_name(), worker = context.worker(), "Worker stopped");
    }
}

impl Team for ActiveTeam {
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
            .thread_name(format!("{}-worker", self.thread_prefix))
            .enable_all()
            .build()
            .map_err(|e| TeamError::Runtime(self.name.clone(), e))?;

        for worker in 0..self.workers {
            let context = JobContext::new(self.id, &self.name, worker);
            runtime.spawn(Self::worker_loop(
                context,
                self.receiver.clone(),
                self.sender.clone(),
                self.stop.clone(),
            ));
        }

        *lock(&self.runtime) = Some(runtime);
        *state = TeamState::Working;

        tracing::info!(team = %self.name, workers = self.workers, "Active team started");
        Ok(())
    }

    fn assign_job(&self, job: Box<dyn Job>, assigner: Option<TeamId>) {
        if *lock(&self.state) == TeamState::Stopped {
            tracing::warn!(team = %self.name, "Team stopped, running job on assigning context");
            run_inline(job, JobContext::new(self.id, &self.name, 0));
            return;
        }

        tracing::trace!(team = %self.name, assigner = ?assigner, process_id = %job.process_id(), "Job assigned");
        if let Err(mpsc::error::SendError(job)) = self.sender.send(job) {
            run_inline(job, JobContext::new(self.id, &self.name, 0));
        }
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

        // Queued jobs are dropped without locks held: dropping a job may
        // assign work to this team.
        let mut abandoned = Vec::new();
        match self.receiver.try_lock() {
            Ok(mut queue) => {
                while let Ok(job) = queue.try_recv() {
                    abandoned.push(job);
                }
            }
            Err(_) => tracing::warn!(team = %self.name, "Queue busy while stopping, pending jobs kept"),
        }
        if !abandoned.is_empty() {
            tracing::warn!(team = %self.name, abandoned = abandoned.len(), "Team stopped with jobs pending");
        }
        drop(abandoned);
        tracing::info!(team = %self.name, "Active team stopped");
    }
}

impl Drop for ActiveTeam {
    fn drop(&mut self) {
        self.stop.cancel();
        if let Some(runtime) = lock(&self.runtime).take() {
            runtime.shutdown_background();
        }
    }
}
