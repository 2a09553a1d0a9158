//! Managed functions and the context they execute in.

use crate::flow::{FlowCallback, FlowDescriptor, FlowStrategy};
use crate::section::FlowMeta;
use conductor_core::{kinds, Cause, EscalationProcedure, ProcessId, ThreadStateId, TypeKey, Value};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What a function asks of its runner after a successful step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Continue with the flow
    Done,

    /// Run this function again later with the same argument
    Again,
}

/// Result of one function step. `Err` escalates the cause.
pub type FunctionResult = Result<Step, Cause>;

/// The unit of work executed by a job.
pub trait ManagedFunction: Send + Sync + 'static {
    /// Execute one step.
    fn execute(&self, context: &mut FunctionContext<'_>) -> FunctionResult;
}

impl<F> ManagedFunction for F
where
    F: Fn(&mut FunctionContext<'_>) -> FunctionResult + Send + Sync + 'static,
{
    fn execute(&self, context: &mut FunctionContext<'_>) -> FunctionResult {
        self(context)
    }
}

/// Declaration of a function within a section.
#[derive(Clone)]
pub struct FunctionDescriptor {
    /// Unique name within the section
    pub name: String,

    /// Declared parameter type
    pub parameter: TypeKey,

    /// Team executing the function; the section default when unset
    pub team: Option<String>,

    /// Flow continued once the function completes
    pub next: Option<FlowDescriptor>,

    /// Flows the function may invoke, by index
    pub flows: Vec<FlowDescriptor>,

    /// Function-local escalation handlers, by handler function name
    pub escalations: EscalationProcedure<String>,

    /// Managed objects the function uses
    pub objects: Vec<String>,

    /// The implementation
    pub function: Arc<dyn ManagedFunction>,
}

impl FunctionDescriptor {
    /// Declare a function implemented by a closure.
    pub fn new<F>(name: impl Into<String>, function: F) -> Self
    where
        F: Fn(&mut FunctionContext<'_>) -> FunctionResult + Send + Sync + 'static,
    {
        Self::with_function(name, function)
    }

    /// Declare a function implemented by a [`ManagedFunction`].
    pub fn with_function(name: impl Into<String>, function: impl ManagedFunction) -> Self {
        Self {
            name: name.into(),
            parameter: TypeKey::any(),
            team: None,
            next: None,
            flows: Vec::new(),
            escalations: EscalationProcedure::new(),
            objects: Vec::new(),
            function: Arc::new(function),
        }
    }

    /// Declare the parameter as the Rust type `T`.
    pub fn parameter<T: Any>(self) -> Self {
        self.parameter_key(TypeKey::of::<T>())
    }

    /// Declare the parameter type.
    pub fn parameter_key(mut self, key: impl Into<TypeKey>) -> Self {
        self.parameter = key.into();
        self
    }

    /// Assign to a team.
    pub fn team(mut self, team: impl Into<String>) -> Self {
        self.team = Some(team.into());
        self
    }

    /// Set the flow continued after completion.
    pub fn next(mut self, flow: FlowDescriptor) -> Self {
        self.next = Some(flow);
        self
    }

    /// Add an invocable flow. Its index is the number of flows added before it.
    pub fn flow(mut self, flow: FlowDescriptor) -> Self {
        self.flows.push(flow);
        self
    }

    /// Handle causes of `kind` with the function named `handler`.
    pub fn escalation(mut self, kind: impl Into<TypeKey>, handler: impl Into<String>) -> Self {
        self.escalations.push(kind, handler.into());
        self
    }

    /// Use a managed object.
    pub fn object(mut self, name: impl Into<String>) -> Self {
        self.objects.push(name.into());
        self
    }
}

impl fmt::Debug for FunctionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionDescriptor")
            .field("name", &self.name)
            .field("parameter", &self.parameter)
            .field("team", &self.team)
            .field("next", &self.next)
            .field("flows", &self.flows)
            .field("objects", &self.objects)
            .finish_non_exhaustive()
    }
}

/// A flow invoked while a function executed.
pub(crate) struct Invocation {
    pub(crate) flow: usize,
    pub(crate) argument: Option<Value>,
    pub(crate) callback: Option<FlowCallback>,
}

/// What a completed step asked for.
#[derive(Default)]
pub(crate) struct Effects {
    pub(crate) invocations: Vec<Invocation>,
    pub(crate) next_argument: Option<Value>,
}

/// Everything a function can see and do while it executes.
pub struct FunctionContext<'a> {
    name: &'a str,
    process_id: ProcessId,
    thread_id: ThreadStateId,
    parameter: Option<&'a Value>,
    objects: Vec<(&'a str, Value)>,
    flows: &'a [FlowMeta],
    cancel: &'a CancellationToken,
    effects: Effects,
}

impl<'a> FunctionContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: &'a str,
        process_id: ProcessId,
        thread_id: ThreadStateId,
        parameter: Option<&'a Value>,
        objects: Vec<(&'a str, Value)>,
        flows: &'a [FlowMeta],
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            name,
            process_id,
            thread_id,
            parameter,
            objects,
            flows,
            cancel,
            effects: Effects::default(),
        }
    }

    /// Name of the executing function.
    pub fn name(&self) -> &str {
        self.name
    }

    /// ProcessState the function runs in.
    pub fn process_id(&self) -> ProcessId {
        self.process_id
    }

    /// ThreadState the function runs in.
    pub fn thread_id(&self) -> ThreadStateId {
        self.thread_id
    }

    /// Whether the process was cancelled.
    ///
    /// Long running steps may check this to stop early.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The raw argument.
    pub fn parameter_value(&self) -> Option<&Value> {
        self.parameter
    }

    /// The argument as `T`.
    pub fn parameter<T: Any>(&self) -> Result<&T, Cause> {
        let value = self.parameter.ok_or_else(|| {
            Cause::new(kinds::parameter(), format!("function '{}' received no argument", self.name))
        })?;
        value.downcast_ref::<T>().ok_or_else(|| {
            Cause::new(
                kinds::parameter(),
                format!("argument of '{}' is not a {}", self.name, std::any::type_name::<T>()),
            )
        })
    }

    /// A declared managed object as `T`.
    pub fn object<T: Any>(&self, name: &str) -> Result<&T, Cause> {
        let (_, value) = self
            .objects
            .iter()
            .find(|(object, _)| *object == name)
            .ok_or_else(|| {
                Cause::new(
                    kinds::object_access(),
                    format!("function '{}' did not declare object '{}'", self.name, name),
                )
            })?;
        value.downcast_ref::<T>().ok_or_else(|| {
            Cause::new(
                kinds::object_access(),
                format!("object '{}' is not a {}", name, std::any::type_name::<T>()),
            )
        })
    }

    /// Invoke the flow declared at `index`.
    ///
    /// The invocation takes effect once this step returns [`Step::Done`].
    pub fn do_flow(&mut self, index: usize, argument: Option<Value>) -> Result<(), Cause> {
        self.invoke(index, argument, None)
    }

    /// Invoke a parallel or spawned flow, calling `callback` once it finishes.
    pub fn do_flow_with_callback(
        &mut self,
        index: usize,
        argument: Option<Value>,
        callback: impl FnOnce(Option<Arc<Cause>>) + Send + 'static,
    ) -> Result<(), Cause> {
        self.invoke(index, argument, Some(Box::new(callback)))
    }

    fn invoke(&mut self, index: usize, argument: Option<Value>, callback: Option<FlowCallback>) -> Result<(), Cause> {
        let flow = self.flows.get(index).ok_or_else(|| {
            Cause::new(
                kinds::runtime(),
                format!("function '{}' has no flow {}", self.name, index),
            )
        })?;
        if callback.is_some() && flow.strategy == FlowStrategy::Sequential {
            return Err(Cause::new(
                kinds::runtime(),
                format!("flow {} of '{}' is sequential and takes no callback", index, self.name),
            ));
        }

        self.effects.invocations.push(Invocation {
            flow: index,
            argument,
            callback,
        });
        Ok(())
    }

    /// Argument for the `next` flow.
    pub fn set_next_argument(&mut self, argument: Value) {
        self.effects.next_argument = Some(argument);
    }

    pub(crate) fn into_effects(self) -> Effects {
        self.effects
    }
}
