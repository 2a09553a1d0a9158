//! ThreadState: a mutually exclusive set of flows within a process.
//!
//! Every flow is a queue of [`JobNode`]s. Flows with a runnable front node
//! sit in the `ready` queue; a flow waiting on a managed object is parked
//! and leaves the queue until its container wakes it. At most one runner
//! executes the nodes of a ThreadState at a time: `running` is the token
//! handed from runner to runner.

use crate::flow::FlowCallback;
use crate::process::ProcessState;
use crate::runner::FunctionRunner;
use conductor_core::sync::lock;
use conductor_core::{Cause, TeamId, ThreadStateId, Value};
use conductor_resource::ManagedObjectContainer;
use conductor_team::Team;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

pub(crate) type FlowId = u64;

/// Lowest scope whose escalation procedure a failing node consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum EscalationLevel {
    Function,
    Thread,
    Process,
}

/// One pending function invocation.
pub(crate) struct JobNode {
    pub(crate) function: usize,
    pub(crate) argument: Option<Value>,
    pub(crate) level: EscalationLevel,
    /// Function scoped containers, in creation order
    objects: Vec<(usize, Arc<ManagedObjectContainer>)>,
}

impl JobNode {
    pub(crate) fn new(function: usize, argument: Option<Value>, level: EscalationLevel) -> Self {
        Self {
            function,
            argument,
            level,
            objects: Vec::new(),
        }
    }

    pub(crate) fn container(
        &mut self,
        object: usize,
        create: impl FnOnce() -> Arc<ManagedObjectContainer>,
    ) -> Arc<ManagedObjectContainer> {
        if let Some((_, container)) = self.objects.iter().find(|(o, _)| *o == object) {
            return container.clone();
        }
        let container = create();
        self.objects.push((object, container.clone()));
        container
    }
}

impl Drop for JobNode {
    fn drop(&mut self) {
        for (_, container) in self.objects.drain(..).rev() {
            container.unload();
        }
    }
}

struct FlowState {
    steps: VecDeque<JobNode>,
    callback: Option<FlowCallback>,
    parked: Option<u64>,
    /// Highest park token released without its waker; later wakes at or
    /// below it are stale.
    released: u64,
}

impl FlowState {
    fn new(node: JobNode, callback: Option<FlowCallback>) -> Self {
        Self {
            steps: VecDeque::from([node]),
            callback,
            parked: None,
            released: 0,
        }
    }

    /// Drop the park token, if any, so its waker is ignored.
    fn unpark(&mut self) -> bool {
        match self.parked.take() {
            Some(token) => {
                self.released = self.released.max(token);
                true
            }
            None => false,
        }
    }
}

struct ThreadInner {
    flows: HashMap<FlowId, FlowState>,
    ready: VecDeque<FlowId>,
    next_flow: FlowId,
    next_token: u64,
    early_wakes: HashSet<u64>,
    running: bool,
    completed: bool,
    containers: Vec<(usize, Arc<ManagedObjectContainer>)>,
    failure: Option<Arc<Cause>>,
    callback: Option<FlowCallback>,
}

impl ThreadInner {
    fn add_flow(&mut self, node: JobNode, callback: Option<FlowCallback>) -> FlowId {
        let id = self.next_flow;
        self.next_flow += 1;
        self.flows.insert(id, FlowState::new(node, callback));
        self.ready.push_back(id);
        id
    }

    fn front(&self) -> Option<&JobNode> {
        let flow = self.ready.front()?;
        self.flows.get(flow)?.steps.front()
    }
}

/// What a runner should do next.
pub(crate) enum NextStep {
    Run(FlowId, JobNode),
    HandOff(Arc<dyn Team>),
    Abandon,
    Idle,
    Complete,
}

/// A logical thread of flows.
pub(crate) struct ThreadState {
    id: ThreadStateId,
    process: Arc<ProcessState>,
    inner: Mutex<ThreadInner>,
}

impl ThreadState {
    /// Create a ThreadState running `node`, registered with its process.
    ///
    /// Nothing runs until [`ThreadState::activate`].
    pub(crate) fn spawn(
        process: &Arc<ProcessState>,
        node: JobNode,
        callback: Option<FlowCallback>,
    ) -> Arc<Self> {
        let mut inner = ThreadInner {
            flows: HashMap::new(),
            ready: VecDeque::new(),
            next_flow: 0,
            next_token: 0,
            early_wakes: HashSet::new(),
            running: false,
            completed: false,
            containers: Vec::new(),
            failure: None,
            callback,
        };
        inner.add_flow(node, None);

        let thread = Arc::new(Self {
            id: ThreadStateId::new(),
            process: process.clone(),
            inner: Mutex::new(inner),
        });
        process.thread_started(&thread);
        tracing::trace!(process_id = %process.id(), thread_id = %thread.id, "ThreadState created");
        thread
    }

    pub(crate) fn id(&self) -> ThreadStateId {
        self.id
    }

    pub(crate) fn process(&self) -> &Arc<ProcessState> {
        &self.process
    }

    fn team_of(&self, node: &JobNode) -> Arc<dyn Team> {
        self.process.section().function(node.function).team.clone()
    }

    /// Assign a runner if there is runnable work and none is running.
    pub(crate) fn activate(self: &Arc<Self>) {
        let team = {
            let mut inner = lock(&self.inner);
            if inner.running || inner.completed {
                return;
            }
            let Some(node) = inner.front() else {
                return;
            };
            let team = self.team_of(node);
            inner.running = true;
            team
        };
        team.assign_job(Box::new(FunctionRunner::new(self.clone())), None);
    }

    /// Take the next node for a runner working on `team`.
    pub(crate) fn next_step(&self, team: TeamId) -> NextStep {
        let mut inner = lock(&self.inner);

        if self.process.is_terminating() && !inner.flows.is_empty() {
            return NextStep::Abandon;
        }

        let Some(node) = inner.front() else {
            inner.running = false;
            if inner.flows.is_empty() {
                inner.completed = true;
                return NextStep::Complete;
            }
            return NextStep::Idle;
        };

        let meta = self.process.section().function(node.function);
        if meta.team_id != team {
            return NextStep::HandOff(meta.team.clone());
        }

        let inner = &mut *inner;
        let taken = inner.ready.front().copied().and_then(|flow| {
            let node = inner.flows.get_mut(&flow)?.steps.pop_front()?;
            Some((flow, node))
        });
        match taken {
            Some((flow, node)) => NextStep::Run(flow, node),
            None => {
                inner.running = false;
                NextStep::Idle
            }
        }
    }

    /// Thread scoped container for `object`, created on first use.
    pub(crate) fn container(
        &self,
        object: usize,
        create: impl FnOnce() -> Arc<ManagedObjectContainer>,
    ) -> Arc<ManagedObjectContainer> {
        let mut inner = lock(&self.inner);
        if let Some((_, container)) = inner.containers.iter().find(|(o, _)| *o == object) {
            return container.clone();
        }
        let container = create();
        inner.containers.push((object, container.clone()));
        container
    }

    pub(crate) fn park_token(&self) -> u64 {
        let mut inner = lock(&self.inner);
        inner.next_token += 1;
        inner.next_token
    }

    /// Park `node` at the front of `flow` until `token` is resumed.
    ///
    /// Hands the node back when the token was already resumed.
    pub(crate) fn park(&self, flow: FlowId, token: u64, node: JobNode) -> Option<JobNode> {
        let mut inner = lock(&self.inner);
        if inner.early_wakes.remove(&token) {
            return Some(node);
        }
        let Some(state) = inner.flows.get_mut(&flow) else {
            return Some(node);
        };
        state.steps.push_front(node);
        state.parked = Some(token);
        inner.ready.retain(|f| *f != flow);
        tracing::trace!(thread_id = %self.id, flow, "Flow parked on managed object");
        None
    }

    /// Waker callback for a parked flow.
    ///
    /// A wake that arrives before the flow parked is remembered for
    /// [`ThreadState::park`]; a wake for a token already released is dropped.
    pub(crate) fn resume(self: &Arc<Self>, flow: FlowId, token: u64) {
        {
            let mut guard = lock(&self.inner);
            let inner = &mut *guard;
            match inner.flows.get_mut(&flow) {
                Some(state) if state.parked == Some(token) => {
                    state.parked = None;
                    inner.ready.push_back(flow);
                }
                Some(state) if token > state.released => {
                    inner.early_wakes.insert(token);
                    return;
                }
                _ => return,
            }
        }
        self.activate();
    }

    /// Make every parked flow runnable again so termination is noticed.
    pub(crate) fn wake_all(self: &Arc<Self>) {
        {
            let mut inner = lock(&self.inner);
            let parked: Vec<FlowId> = inner
                .flows
                .iter_mut()
                .filter_map(|(id, state)| state.unpark().then_some(*id))
                .collect();
            inner.ready.extend(parked);
        }
        self.activate();
    }

    /// Put a node that asked to run again back, behind the other ready flows.
    pub(crate) fn repeat(&self, flow: FlowId, node: JobNode) {
        let mut inner = lock(&self.inner);
        match inner.flows.get_mut(&flow) {
            Some(state) => state.steps.push_front(node),
            None => return,
        }
        inner.ready.retain(|f| *f != flow);
        inner.ready.push_back(flow);
    }

    /// Continue `flow` after a completed step.
    ///
    /// Sequential nodes run next on the same flow, in order; parallel nodes
    /// start new flows. Returns the callback of the flow if it finished.
    pub(crate) fn complete_step(
        &self,
        flow: FlowId,
        sequential: Vec<JobNode>,
        parallel: Vec<(JobNode, Option<FlowCallback>)>,
    ) -> Option<FlowCallback> {
        let mut inner = lock(&self.inner);

        let finished = match inner.flows.get_mut(&flow) {
            Some(state) => {
                for node in sequential.into_iter().rev() {
                    state.steps.push_front(node);
                }
                state.steps.is_empty()
            }
            None => false,
        };

        for (node, callback) in parallel {
            inner.add_flow(node, callback);
        }

        if !finished {
            return None;
        }
        inner.ready.retain(|f| *f != flow);
        inner.flows.remove(&flow).and_then(|state| state.callback)
    }

    /// Replace the rest of `flow` with an escalation handler.
    ///
    /// Returns the discarded nodes; drop them without holding any lock.
    pub(crate) fn replace_flow(&self, flow: FlowId, handler: JobNode) -> VecDeque<JobNode> {
        let mut inner = lock(&self.inner);
        match inner.flows.get_mut(&flow) {
            Some(state) => {
                let discarded = std::mem::take(&mut state.steps);
                state.steps.push_back(handler);
                state.unpark();
                if !inner.ready.contains(&flow) {
                    inner.ready.push_front(flow);
                }
                discarded
            }
            None => {
                inner.add_flow(handler, None);
                VecDeque::new()
            }
        }
    }

    /// Abandon every flow, ending the ThreadState with `cause`.
    pub(crate) fn terminate(&self, cause: Arc<Cause>) {
        let flows: Vec<FlowState> = {
            let mut inner = lock(&self.inner);
            inner.ready.clear();
            inner.failure.get_or_insert_with(|| cause.clone());
            inner.flows.drain().map(|(_, state)| state).collect()
        };

        tracing::debug!(
            thread_id = %self.id,
            process_id = %self.process.id(),
            flows = flows.len(),
            cause = %cause,
            "ThreadState terminated"
        );

        for mut flow in flows {
            flow.steps.clear();
            if let Some(callback) = flow.callback.take() {
                callback(Some(cause.clone()));
            }
        }
    }

    /// End a ThreadState whose runner was dropped by its team before
    /// completing it. Cancels the process.
    pub(crate) fn abandon(&self) {
        self.end_abandoned(true);
    }

    /// End a ThreadState that was never activated. No-op once a runner
    /// has taken it over.
    pub(crate) fn abandon_unstarted(&self) {
        self.end_abandoned(false);
    }

    fn end_abandoned(&self, owns_running: bool) {
        {
            let mut inner = lock(&self.inner);
            if inner.completed || (inner.running && !owns_running) {
                return;
            }
            inner.completed = true;
            inner.running = false;
        }
        tracing::debug!(thread_id = %self.id, process_id = %self.process.id(), "ThreadState abandoned before completion");

        self.process.cancel();
        self.terminate(self.process.termination_cause());
        self.finish();
    }

    /// Release thread scoped objects and report completion.
    pub(crate) fn finish(&self) {
        let (containers, callback, failure) = {
            let mut inner = lock(&self.inner);
            (
                std::mem::take(&mut inner.containers),
                inner.callback.take(),
                inner.failure.clone(),
            )
        };

        for (_, container) in containers.into_iter().rev() {
            container.unload();
        }
        tracing::trace!(thread_id = %self.id, process_id = %self.process.id(), "ThreadState complete");

        if let Some(callback) = callback {
            callback(failure);
        }
        self.process.thread_completed(self.id);
    }
}
