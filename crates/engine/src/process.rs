//! ProcessState: the unit of work of one external invocation.

use crate::error::InvokeError;
use crate::object::sourcing;
use crate::section::Section;
use crate::thread::ThreadState;
use chrono::Utc;
use conductor_core::sync::lock;
use conductor_core::{kinds, Cause, EscalationHandler, ProcessId, ThreadStateId, Time, TypeKey, Value};
use conductor_resource::{ManagedObject, ManagedObjectContainer};
use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Lifecycle of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessLifecycle {
    /// Created, no ThreadState started yet
    Created,
    /// At least one ThreadState is active
    Running,
    /// The last ThreadState finished; resources are being released
    Completing,
    /// Released and reported
    Complete,
}

/// How a process ended.
#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    /// Every ThreadState finished
    Completed,
    /// An escalation reached the platform
    Failed(Arc<Cause>),
    /// Cancelled through its handle
    Cancelled,
}

impl ProcessOutcome {
    /// Whether the process completed normally.
    pub fn is_completed(&self) -> bool {
        matches!(self, ProcessOutcome::Completed)
    }
}

/// Report handed to the completion callback and to waiters.
#[derive(Debug, Clone)]
pub struct ProcessSummary {
    /// Process id
    pub id: ProcessId,

    /// When the process was invoked
    pub started: Time,

    /// When the last ThreadState finished
    pub completed: Time,

    /// How it ended
    pub outcome: ProcessOutcome,
}

/// Called once when a process completes.
pub type ProcessCallback = Box<dyn FnOnce(&ProcessSummary) + Send>;

/// Arguments of a process invocation.
#[derive(Default)]
pub struct ProcessInput {
    pub(crate) parameter: Option<Value>,
    pub(crate) parameter_type: Option<TypeKey>,
    pub(crate) bound: Option<(String, Arc<dyn ManagedObject>)>,
    pub(crate) escalation_handler: Option<Arc<dyn EscalationHandler>>,
    pub(crate) delay: Option<Duration>,
    pub(crate) callback: Option<ProcessCallback>,
}

impl ProcessInput {
    /// Invocation without an argument.
    pub fn new() -> Self {
        Self::default()
    }

    /// Invocation with a typed argument, checked against the function's parameter.
    pub fn with<T: Any + Send + Sync>(argument: T) -> Self {
        Self::new()
            .parameter(Arc::new(argument))
            .parameter_type(TypeKey::of::<T>())
    }

    /// Set the argument.
    pub fn parameter(mut self, argument: Value) -> Self {
        self.parameter = Some(argument);
        self
    }

    /// Declare the argument type.
    pub fn parameter_type(mut self, key: impl Into<TypeKey>) -> Self {
        self.parameter_type = Some(key.into());
        self
    }

    /// Bind an object to the process input slot `name`.
    pub fn bind(mut self, name: impl Into<String>, object: Arc<dyn ManagedObject>) -> Self {
        self.bound = Some((name.into(), object));
        self
    }

    /// Handle escalations that no function or section handler matched.
    pub fn escalation_handler(mut self, handler: Arc<dyn EscalationHandler>) -> Self {
        self.escalation_handler = Some(handler);
        self
    }

    /// Start the process after `delay`.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Call `callback` once the process completes.
    pub fn on_complete(mut self, callback: impl FnOnce(&ProcessSummary) + Send + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }
}

impl fmt::Debug for ProcessInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessInput")
            .field("parameter_type", &self.parameter_type)
            .field("bound", &self.bound.as_ref().map(|(name, _)| name))
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

struct ProcessInner {
    lifecycle: ProcessLifecycle,
    active_threads: usize,
    /// Live ThreadStates; a parked one has no other owner
    threads: Vec<Arc<ThreadState>>,
    containers: Vec<(usize, Arc<ManagedObjectContainer>)>,
    failure: Option<Arc<Cause>>,
    callback: Option<ProcessCallback>,
    completion: Option<oneshot::Sender<ProcessSummary>>,
}

pub(crate) struct ProcessState {
    id: ProcessId,
    section: Arc<Section>,
    started: Time,
    cancel: CancellationToken,
    escalation_handler: Option<Arc<dyn EscalationHandler>>,
    bound: Option<(usize, Arc<dyn ManagedObject>)>,
    inner: Mutex<ProcessInner>,
}

impl ProcessState {
    pub(crate) fn create(
        section: Arc<Section>,
        bound: Option<(usize, Arc<dyn ManagedObject>)>,
        escalation_handler: Option<Arc<dyn EscalationHandler>>,
        callback: Option<ProcessCallback>,
    ) -> (Arc<Self>, ProcessHandle) {
        let (sender, receiver) = oneshot::channel();
        let process = Arc::new(Self {
            id: ProcessId::new(),
            section,
            started: Utc::now(),
            cancel: CancellationToken::new(),
            escalation_handler,
            bound,
            inner: Mutex::new(ProcessInner {
                lifecycle: ProcessLifecycle::Created,
                active_threads: 0,
                threads: Vec::new(),
                containers: Vec::new(),
                failure: None,
                callback,
                completion: Some(sender),
            }),
        });

        let handle = ProcessHandle {
            id: process.id,
            process: Arc::downgrade(&process),
            cancel: process.cancel.clone(),
            completion: receiver,
        };
        (process, handle)
    }

    pub(crate) fn id(&self) -> ProcessId {
        self.id
    }

    pub(crate) fn section(&self) -> &Arc<Section> {
        &self.section
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn escalation_handler(&self) -> Option<&Arc<dyn EscalationHandler>> {
        self.escalation_handler.as_ref()
    }

    pub(crate) fn lifecycle(&self) -> ProcessLifecycle {
        lock(&self.inner).lifecycle
    }

    /// Whether remaining steps should be skipped.
    pub(crate) fn is_terminating(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cause handed to flows abandoned because the process is terminating.
    pub(crate) fn termination_cause(&self) -> Arc<Cause> {
        lock(&self.inner)
            .failure
            .clone()
            .unwrap_or_else(|| Arc::new(Cause::new(kinds::cancelled(), format!("process {} was cancelled", self.id))))
    }

    /// Process scoped container for `object`, created on first use.
    pub(crate) fn container(&self, object: usize) -> Arc<ManagedObjectContainer> {
        let mut inner = lock(&self.inner);
        if let Some((_, container)) = inner.containers.iter().find(|(o, _)| *o == object) {
            return container.clone();
        }

        let meta = self.section.object(object);
        let bound = self
            .bound
            .as_ref()
            .filter(|(slot, _)| *slot == object)
            .map(|(_, bound)| bound.clone());
        let container = ManagedObjectContainer::new(meta.name.clone(), sourcing(&meta.provider, bound));
        inner.containers.push((object, container.clone()));
        container
    }

    pub(crate) fn thread_started(&self, thread: &Arc<ThreadState>) {
        let mut inner = lock(&self.inner);
        inner.active_threads += 1;
        inner.threads.push(thread.clone());
        if inner.lifecycle == ProcessLifecycle::Created {
            inner.lifecycle = ProcessLifecycle::Running;
        }
    }

    /// Fail the process: every other ThreadState abandons its remaining steps.
    pub(crate) fn fail(&self, cause: Arc<Cause>) {
        lock(&self.inner).failure.get_or_insert(cause);
        self.cancel();
    }

    /// Cancel the process, waking parked flows so they are abandoned.
    pub(crate) fn cancel(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        tracing::debug!(process_id = %self.id, "Process cancelled");

        let threads = lock(&self.inner).threads.clone();
        for thread in threads {
            thread.wake_all();
        }
    }

    pub(crate) fn thread_completed(&self, thread: ThreadStateId) {
        let (containers, callback, completion, failure) = {
            let mut inner = lock(&self.inner);
            inner.threads.retain(|t| t.id() != thread);
            assert!(inner.active_threads > 0, "process {} completed more threads than it started", self.id);
            inner.active_threads -= 1;
            if inner.active_threads > 0 {
                return;
            }
            inner.lifecycle = ProcessLifecycle::Completing;
            (
                std::mem::take(&mut inner.containers),
                inner.callback.take(),
                inner.completion.take(),
                inner.failure.clone(),
            )
        };

        for (_, container) in containers.into_iter().rev() {
            container.unload();
        }

        let outcome = match failure {
            Some(cause) => ProcessOutcome::Failed(cause),
            None if self.cancel.is_cancelled() => ProcessOutcome::Cancelled,
            None => ProcessOutcome::Completed,
        };
        let summary = ProcessSummary {
            id: self.id,
            started: self.started,
            completed: Utc::now(),
            outcome,
        };
        lock(&self.inner).lifecycle = ProcessLifecycle::Complete;
        tracing::debug!(process_id = %self.id, outcome = ?summary.outcome, "Process complete");

        if let Some(callback) = callback {
            callback(&summary);
        }
        if let Some(completion) = completion {
            let _ = completion.send(summary);
        }
        for listener in &self.section.platform().listeners {
            listener.process_completed(self.id);
        }
    }
}

impl Drop for ProcessState {
    fn drop(&mut self) {
        let inner = match self.inner.get_mut() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        if inner.completion.is_none() {
            return;
        }
        // Dropping the sender resolves waiters with `Abandoned`.
        tracing::warn!(process_id = %self.id, "Process dropped before completing");
        for listener in &self.section.platform().listeners {
            listener.process_completed(self.id);
        }
    }
}

/// Returned to the invoker of a process.
///
/// Does not keep the process alive: a process dropped without completing
/// resolves its waiters with [`InvokeError::Abandoned`].
pub struct ProcessHandle {
    id: ProcessId,
    process: Weak<ProcessState>,
    cancel: CancellationToken,
    completion: oneshot::Receiver<ProcessSummary>,
}

impl ProcessHandle {
    /// Process id.
    pub fn id(&self) -> ProcessId {
        self.id
    }

    /// Request cooperative cancellation.
    ///
    /// Steps already executing finish; remaining steps are skipped.
    pub fn cancel(&self) {
        if let Some(process) = self.process.upgrade() {
            process.cancel();
        }
    }

    /// Whether cancellation was requested or the process failed.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Current lifecycle state; `Complete` once the process is released.
    pub fn lifecycle(&self) -> ProcessLifecycle {
        self.process
            .upgrade()
            .map_or(ProcessLifecycle::Complete, |process| process.lifecycle())
    }

    /// Wait for completion.
    pub async fn wait(self) -> Result<ProcessSummary, InvokeError> {
        self.completion.await.map_err(|_| InvokeError::Abandoned(self.id))
    }

    /// Wait for completion, blocking the current thread.
    ///
    /// Must not be called from within an async runtime.
    pub fn wait_blocking(self) -> Result<ProcessSummary, InvokeError> {
        self.completion.blocking_recv().map_err(|_| InvokeError::Abandoned(self.id))
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle").field("id", &self.id).finish_non_exhaustive()
    }
}
