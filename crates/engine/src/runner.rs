//! The job that executes a ThreadState's function nodes.
//!
//! A runner keeps executing nodes for as long as they belong to the team
//! it is running on, up to the configured batch. A node of another team is
//! handed off by assigning a fresh runner to that team; the running token
//! of the ThreadState travels with it.

use crate::flow::{FlowCallback, FlowStrategy};
use crate::function::{Effects, FunctionContext, Step};
use crate::object::{sourcing, ObjectScope};
use crate::section::Section;
use crate::thread::{EscalationLevel, FlowId, JobNode, NextStep, ThreadState};
use conductor_core::{value, Cause, ProcessId, Value};
use conductor_resource::{Dependencies, ManagedObjectContainer, Readiness};
use conductor_team::{Job, JobContext};
use std::sync::{Arc, Weak};

enum Progress {
    Continue,
    Yield,
}

enum Loaded {
    Ready(JobNode),
    Parked,
    Failed(JobNode, Cause),
}

/// Executes nodes of one ThreadState.
///
/// Holds the running token until `do_job` reports done. A runner dropped
/// before that, by a stopping team, abandons its ThreadState.
pub(crate) struct FunctionRunner {
    thread: Arc<ThreadState>,
    released: bool,
}

impl FunctionRunner {
    pub(crate) fn new(thread: Arc<ThreadState>) -> Self {
        Self { thread, released: false }
    }

    fn drive(&mut self, context: &JobContext) -> bool {
        let batch = self.thread.process().section().platform().runner_batch;

        for _ in 0..batch {
            match self.thread.next_step(context.team()) {
                NextStep::Run(flow, node) => {
                    if let Progress::Yield = self.run(flow, node) {
                        return false;
                    }
                }
                NextStep::HandOff(team) => {
                    tracing::trace!(
                        process_id = %self.process_id(),
                        from = %context.team_name(),
                        to = %team.name(),
                        "Handing ThreadState to another team"
                    );
                    team.assign_job(Box::new(FunctionRunner::new(self.thread.clone())), Some(context.team()));
                    return true;
                }
                NextStep::Abandon => {
                    let cause = self.thread.process().termination_cause();
                    self.thread.terminate(cause);
                }
                NextStep::Idle => return true,
                NextStep::Complete => {
                    self.thread.finish();
                    return true;
                }
            }
        }
        false
    }

    fn run(&self, flow: FlowId, node: JobNode) -> Progress {
        let process = self.thread.process().clone();
        let section = process.section().clone();

        let mut node = match self.load_objects(&section, flow, node) {
            Loaded::Ready(node) => node,
            Loaded::Parked => return Progress::Continue,
            Loaded::Failed(node, cause) => {
                self.escalate(&section, flow, node, cause);
                return Progress::Continue;
            }
        };

        let meta = section.function(node.function);
        let mut objects = Vec::with_capacity(meta.objects.len());
        for &object in &meta.objects {
            let container = self.container(&section, &mut node, object);
            match container.value() {
                Ok(value) => objects.push((section.object(object).name.as_str(), value)),
                Err(cause) => {
                    self.escalate(&section, flow, node, cause);
                    return Progress::Continue;
                }
            }
        }

        tracing::trace!(
            process_id = %process.id(),
            thread_id = %self.thread.id(),
            function = %meta.name,
            "Executing function"
        );
        let (result, effects) = {
            let mut context = FunctionContext::new(
                &meta.name,
                process.id(),
                self.thread.id(),
                node.argument.as_ref(),
                objects,
                &meta.flows,
                process.cancel_token(),
            );
            let result = meta.function.execute(&mut context);
            (result, context.into_effects())
        };

        match result {
            Ok(Step::Done) => {
                self.complete(&section, flow, node, effects);
                Progress::Continue
            }
            Ok(Step::Again) => {
                self.thread.repeat(flow, node);
                Progress::Yield
            }
            Err(cause) => {
                self.escalate(&section, flow, node, cause);
                Progress::Continue
            }
        }
    }

    fn container(&self, section: &Section, node: &mut JobNode, object: usize) -> Arc<ManagedObjectContainer> {
        let meta = section.object(object);
        let create = || ManagedObjectContainer::new(meta.name.clone(), sourcing(&meta.provider, None));
        match meta.scope {
            ObjectScope::Function => node.container(object, create),
            ObjectScope::Thread => self.thread.container(object, create),
            ObjectScope::Process => self.thread.process().container(object),
        }
    }

    /// Load the node's objects in dependency order, parking the flow on
    /// the first one that is not ready.
    fn load_objects(&self, section: &Section, flow: FlowId, mut node: JobNode) -> Loaded {
        let objects = section.function(node.function).objects.clone();
        let mut next = 0;
        while next < objects.len() {
            let object = objects[next];
            let container = self.container(section, &mut node, object);
            if container.is_ready() {
                next += 1;
                continue;
            }

            let mut dependencies = Dependencies::new();
            for &dependency in &section.object(object).dependencies {
                let value: Result<Value, Cause> = self.container(section, &mut node, dependency).value();
                match value {
                    Ok(value) => dependencies.insert(section.object(dependency).name.clone(), value),
                    Err(cause) => return Loaded::Failed(node, cause),
                }
            }

            let token = self.thread.park_token();
            let waker = {
                let thread: Weak<ThreadState> = Arc::downgrade(&self.thread);
                move || {
                    if let Some(thread) = thread.upgrade() {
                        thread.resume(flow, token);
                    }
                }
            };

            match container.load(&dependencies, waker) {
                Readiness::Ready => next += 1,
                Readiness::Failed(cause) => return Loaded::Failed(node, cause),
                Readiness::Pending => match self.thread.park(flow, token, node) {
                    Some(woken) => node = woken,
                    None => return Loaded::Parked,
                },
            }
        }
        Loaded::Ready(node)
    }

    fn complete(&self, section: &Section, flow: FlowId, node: JobNode, effects: Effects) {
        let meta = section.function(node.function);
        let mut sequential = Vec::new();
        let mut parallel: Vec<(JobNode, Option<FlowCallback>)> = Vec::new();
        let mut spawned: Vec<(JobNode, Option<FlowCallback>)> = Vec::new();

        for invocation in effects.invocations {
            let target = &meta.flows[invocation.flow];
            match target.strategy {
                FlowStrategy::Sequential => {
                    sequential.push(JobNode::new(target.target, invocation.argument, node.level))
                }
                FlowStrategy::Parallel => parallel.push((
                    JobNode::new(target.target, invocation.argument, EscalationLevel::Function),
                    invocation.callback,
                )),
                FlowStrategy::Spawn => spawned.push((
                    JobNode::new(target.target, invocation.argument, EscalationLevel::Function),
                    invocation.callback,
                )),
            }
        }
        if let Some(next) = &meta.next {
            sequential.push(JobNode::new(next.target, effects.next_argument, node.level));
        }
        drop(node);

        let finished = self.thread.complete_step(flow, sequential, parallel);

        let process = self.thread.process();
        for (node, callback) in spawned {
            ThreadState::spawn(process, node, callback).activate();
        }

        if let Some(callback) = finished {
            callback(None);
        }
    }

    /// Route a failure: function handlers, then section handlers, then the
    /// handler bound to the process, then the platform.
    fn escalate(&self, section: &Section, flow: FlowId, node: JobNode, cause: Cause) {
        let process = self.thread.process();
        let meta = section.function(node.function);
        tracing::debug!(
            process_id = %process.id(),
            function = %meta.name,
            kind = %cause.kind(),
            "Function escalated: {}",
            cause.message()
        );

        let handler = if node.level <= EscalationLevel::Function {
            meta.escalations
                .get_escalation(&cause)
                .map(|e| (e.handler, EscalationLevel::Thread))
        } else {
            None
        };
        let handler = handler.or_else(|| {
            if node.level <= EscalationLevel::Thread {
                section
                    .escalations()
                    .get_escalation(&cause)
                    .map(|e| (e.handler, EscalationLevel::Process))
            } else {
                None
            }
        });
        drop(node);

        if let Some((handler, level)) = handler {
            let discarded = self.thread.replace_flow(flow, JobNode::new(handler, Some(value(cause)), level));
            drop(discarded);
            return;
        }

        let cause = match process.escalation_handler() {
            Some(handler) => match handler.handle_escalation(&cause) {
                Ok(()) => {
                    tracing::debug!(process_id = %process.id(), kind = %cause.kind(), "Escalation handled by process handler");
                    self.thread.terminate(Arc::new(cause));
                    return;
                }
                Err(cause) => cause,
            },
            None => cause,
        };

        section.platform().escalation_handler.handle_platform_escalation(&cause);
        let cause = Arc::new(cause);
        process.fail(cause.clone());
        self.thread.terminate(cause);
    }
}

impl Job for FunctionRunner {
    fn process_id(&self) -> ProcessId {
        self.thread.process().id()
    }

    fn do_job(&mut self, context: &JobContext) -> bool {
        let done = self.drive(context);
        self.released = done;
        done
    }
}

impl Drop for FunctionRunner {
    fn drop(&mut self) {
        if !self.released {
            self.thread.abandon();
        }
    }
}
