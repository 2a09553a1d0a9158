//! Sections: validated function tables and the process entry point.
//!
//! A [`SectionBuilder`] collects descriptors by name. Opening the conductor
//! validates every builder once, resolving names to indices; problems are
//! reported as issues and keep the section from opening. A [`Section`]
//! never holds an unresolved name.

use crate::conductor::Platform;
use crate::error::InvokeError;
use crate::flow::{FlowDescriptor, FlowStrategy};
use crate::function::{FunctionDescriptor, ManagedFunction};
use crate::object::{ObjectDescriptor, ObjectProvider, ObjectScope};
use crate::process::{ProcessHandle, ProcessInput, ProcessState};
use crate::thread::{EscalationLevel, JobNode, ThreadState};
use conductor_core::{
    AssetKind, Cause, EscalationProcedure, Issue, IssueCollector, TeamId, TypeKey,
};
use conductor_team::Team;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Declarations of one section.
#[derive(Debug, Clone)]
pub struct SectionBuilder {
    name: String,
    team: Option<String>,
    functions: Vec<FunctionDescriptor>,
    objects: Vec<ObjectDescriptor>,
    escalations: EscalationProcedure<String>,
    startup: Vec<String>,
}

impl SectionBuilder {
    /// Start a section.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            team: None,
            functions: Vec::new(),
            objects: Vec::new(),
            escalations: EscalationProcedure::new(),
            startup: Vec::new(),
        }
    }

    /// Section name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Team for functions that do not name one, instead of the conductor default.
    pub fn team(mut self, team: impl Into<String>) -> Self {
        self.team = Some(team.into());
        self
    }

    /// Add a function.
    pub fn function(mut self, function: FunctionDescriptor) -> Self {
        self.functions.push(function);
        self
    }

    /// Add a managed object.
    pub fn object(mut self, object: ObjectDescriptor) -> Self {
        self.objects.push(object);
        self
    }

    /// Handle causes of `kind` escaping any function with `handler`.
    ///
    /// Consulted for every ThreadState of the section once function-local
    /// handlers did not match.
    pub fn escalation(mut self, kind: impl Into<TypeKey>, handler: impl Into<String>) -> Self {
        self.escalations.push(kind, handler.into());
        self
    }

    /// Invoke `function` as its own process when the conductor opens.
    pub fn startup(mut self, function: impl Into<String>) -> Self {
        self.startup.push(function.into());
        self
    }

    /// Resolve and check every declaration.
    ///
    /// Returns `None` when any issue was reported.
    pub(crate) fn build(
        self,
        platform: &Arc<Platform>,
        issues: &mut dyn IssueCollector,
    ) -> Option<Arc<Section>> {
        let mut validator = Validator {
            scope: self.name.clone(),
            issues,
            count: 0,
        };
        let section = validator.build(self, platform);
        if validator.count > 0 {
            tracing::warn!(section = %validator.scope, issues = validator.count, "Section has configuration issues");
            return None;
        }
        section.map(Arc::new)
    }
}

pub(crate) struct FlowMeta {
    pub(crate) target: usize,
    pub(crate) strategy: FlowStrategy,
}

pub(crate) struct FunctionMeta {
    pub(crate) name: String,
    pub(crate) parameter: TypeKey,
    pub(crate) team: Arc<dyn Team>,
    pub(crate) team_id: TeamId,
    pub(crate) next: Option<FlowMeta>,
    pub(crate) flows: Vec<FlowMeta>,
    pub(crate) escalations: EscalationProcedure<usize>,
    /// Every object the function needs, dependencies first
    pub(crate) objects: Vec<usize>,
    pub(crate) function: Arc<dyn ManagedFunction>,
}

pub(crate) struct ObjectMeta {
    pub(crate) name: String,
    pub(crate) scope: ObjectScope,
    pub(crate) provider: ObjectProvider,
    pub(crate) dependencies: Vec<usize>,
}

/// A validated, open section.
pub struct Section {
    name: String,
    functions: Vec<FunctionMeta>,
    index: HashMap<String, usize>,
    objects: Vec<ObjectMeta>,
    escalations: EscalationProcedure<usize>,
    startup: Vec<usize>,
    platform: Arc<Platform>,
}

impl Section {
    /// Section name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names of the section's functions in declaration order.
    pub fn function_names(&self) -> impl Iterator<Item = &str> {
        self.functions.iter().map(|f| f.name.as_str())
    }

    /// Whether the section declares `function`.
    pub fn has_function(&self, function: &str) -> bool {
        self.index.contains_key(function)
    }

    pub(crate) fn function(&self, index: usize) -> &FunctionMeta {
        &self.functions[index]
    }

    pub(crate) fn object(&self, index: usize) -> &ObjectMeta {
        &self.objects[index]
    }

    pub(crate) fn escalations(&self) -> &EscalationProcedure<usize> {
        &self.escalations
    }

    pub(crate) fn platform(&self) -> &Arc<Platform> {
        &self.platform
    }

    pub(crate) fn startup_functions(&self) -> impl Iterator<Item = &str> + '_ {
        self.startup.iter().map(|&i| self.functions[i].name.as_str())
    }

    /// Invoke `function` as a new process.
    ///
    /// Listeners are told about the process on this context before any of
    /// its jobs are assigned.
    pub fn invoke_process(
        self: &Arc<Self>,
        function: &str,
        input: ProcessInput,
    ) -> Result<ProcessHandle, InvokeError> {
        if !self.platform.is_open() {
            return Err(InvokeError::NotOpen(self.name.clone()));
        }

        let index = *self
            .index
            .get(function)
            .ok_or_else(|| InvokeError::UnknownFunction(self.name.clone(), function.to_string()))?;
        let meta = &self.functions[index];

        if let Some(actual) = &input.parameter_type {
            if !actual.is_assignable_to(&meta.parameter) {
                return Err(InvokeError::ParameterType {
                    function: function.to_string(),
                    expected: meta.parameter.clone(),
                    actual: actual.clone(),
                });
            }
        }

        let bound = match input.bound {
            Some((name, object)) => {
                let slot = self
                    .objects
                    .iter()
                    .position(|o| o.name == name && matches!(o.provider, ObjectProvider::Input))
                    .ok_or(InvokeError::UnknownInput(name))?;
                Some((slot, object))
            }
            None => None,
        };

        let (process, handle) = ProcessState::create(
            self.clone(),
            bound,
            input.escalation_handler,
            input.callback,
        );
        tracing::debug!(section = %self.name, function, process_id = %process.id(), "Process invoked");
        for listener in &self.platform.listeners {
            listener.process_created(process.id());
        }

        let thread = ThreadState::spawn(
            &process,
            JobNode::new(index, input.parameter, EscalationLevel::Function),
            None,
        );

        match input.delay {
            Some(delay) if !delay.is_zero() => {
                let start = DelayedStart(Some(thread));
                self.platform.timer.spawn(async move {
                    tokio::time::sleep(delay).await;
                    start.fire();
                });
            }
            _ => thread.activate(),
        }

        Ok(handle)
    }
}

/// Activates a ThreadState once its delay elapsed. Dropped unfired, when
/// the timer shuts down, it abandons the ThreadState so the process ends
/// as cancelled.
struct DelayedStart(Option<Arc<ThreadState>>);

impl DelayedStart {
    fn fire(mut self) {
        if let Some(thread) = self.0.take() {
            thread.activate();
        }
    }
}

impl Drop for DelayedStart {
    fn drop(&mut self) {
        if let Some(thread) = self.0.take() {
            tracing::debug!(process_id = %thread.process().id(), "Delayed start dropped");
            thread.abandon_unstarted();
        }
    }
}

struct Validator<'a> {
    scope: String,
    issues: &'a mut dyn IssueCollector,
    count: usize,
}

impl Validator<'_> {
    fn issue(&mut self, asset: AssetKind, name: &str, message: String) {
        self.count += 1;
        self.issues.add_issue(Issue {
            scope: self.scope.clone(),
            asset,
            name: name.to_string(),
            message,
        });
    }

    fn build(&mut self, builder: SectionBuilder, platform: &Arc<Platform>) -> Option<Section> {
        if builder.name.trim().is_empty() {
            self.issue(AssetKind::Section, &builder.name, "section name must not be empty".into());
        }

        let mut index = HashMap::new();
        for (i, function) in builder.functions.iter().enumerate() {
            if function.name.trim().is_empty() {
                self.issue(AssetKind::Function, &function.name, "function name must not be empty".into());
            }
            if index.insert(function.name.clone(), i).is_some() {
                self.issue(AssetKind::Function, &function.name, "function declared more than once".into());
            }
        }

        let objects = self.resolve_objects(&builder.objects);
        let object_index: HashMap<&str, usize> = builder
            .objects
            .iter()
            .enumerate()
            .map(|(i, o)| (o.name.as_str(), i))
            .collect();

        let default_team = builder
            .team
            .clone()
            .unwrap_or_else(|| platform.default_team.clone());

        let mut functions = Vec::with_capacity(builder.functions.len());
        for function in &builder.functions {
            let team_name = function.team.as_ref().unwrap_or(&default_team);
            let team = platform.teams.get(team_name).cloned();
            if team.is_none() {
                self.issue(
                    AssetKind::Team,
                    team_name,
                    format!("function '{}' is assigned to an unknown team", function.name),
                );
            }

            let flows = function
                .flows
                .iter()
                .filter_map(|flow| self.resolve_flow(function, flow, &builder.functions, &index))
                .collect();

            let next = function.next.as_ref().and_then(|flow| {
                if flow.strategy != FlowStrategy::Sequential {
                    self.issue(
                        AssetKind::Flow,
                        &function.name,
                        format!("next flow to '{}' must be sequential", flow.target),
                    );
                }
                self.resolve_flow(function, flow, &builder.functions, &index)
            });

            let escalations =
                self.resolve_escalations(&function.name, &function.escalations, &builder.functions, &index);

            let mut declared = Vec::new();
            for name in &function.objects {
                match object_index.get(name.as_str()) {
                    Some(&object) => declared.push(object),
                    None => self.issue(
                        AssetKind::Object,
                        name,
                        format!("function '{}' uses an undeclared object", function.name),
                    ),
                }
            }

            if let Some(team) = team {
                functions.push(FunctionMeta {
                    name: function.name.clone(),
                    parameter: function.parameter.clone(),
                    team_id: team.id(),
                    team,
                    next,
                    flows,
                    escalations,
                    objects: load_order(&declared, &objects),
                    function: function.function.clone(),
                });
            }
        }

        let escalations =
            self.resolve_escalations(&builder.name, &builder.escalations, &builder.functions, &index);

        let mut startup = Vec::new();
        for name in &builder.startup {
            match index.get(name) {
                Some(&i) => startup.push(i),
                None => self.issue(AssetKind::Function, name, "startup function is not declared".into()),
            }
        }

        if self.count > 0 {
            return None;
        }

        Some(Section {
            name: builder.name,
            functions,
            index,
            objects,
            escalations,
            startup,
            platform: platform.clone(),
        })
    }

    fn resolve_objects(&mut self, declared: &[ObjectDescriptor]) -> Vec<ObjectMeta> {
        let mut names = HashMap::new();
        for (i, object) in declared.iter().enumerate() {
            if names.insert(object.name.as_str(), i).is_some() {
                self.issue(AssetKind::Object, &object.name, "object declared more than once".into());
            }
        }

        let mut objects = Vec::with_capacity(declared.len());
        for object in declared {
            let mut dependencies = Vec::new();
            for dependency in &object.dependencies {
                let Some(&d) = names.get(dependency.as_str()) else {
                    self.issue(
                        AssetKind::Object,
                        &object.name,
                        format!("depends on undeclared object '{}'", dependency),
                    );
                    continue;
                };
                if declared[d].scope < object.scope {
                    self.issue(
                        AssetKind::Object,
                        &object.name,
                        format!(
                            "{:?} scoped object depends on '{}' which only lives for a {:?}",
                            object.scope, dependency, declared[d].scope
                        ),
                    );
                }
                dependencies.push(d);
            }
            objects.push(ObjectMeta {
                name: object.name.clone(),
                scope: object.scope,
                provider: object.provider.clone(),
                dependencies,
            });
        }

        for cyclic in find_cycles(&objects) {
            let name = objects[cyclic].name.clone();
            self.issue(AssetKind::Object, &name, "dependency cycle".into());
        }
        objects
    }

    fn resolve_flow(
        &mut self,
        function: &FunctionDescriptor,
        flow: &FlowDescriptor,
        functions: &[FunctionDescriptor],
        index: &HashMap<String, usize>,
    ) -> Option<FlowMeta> {
        let Some(&target) = index.get(&flow.target) else {
            self.issue(
                AssetKind::Flow,
                &function.name,
                format!("flow targets unknown function '{}'", flow.target),
            );
            return None;
        };

        if let Some(argument) = &flow.argument_type {
            let parameter = &functions[target].parameter;
            if !argument.is_assignable_to(parameter) {
                self.issue(
                    AssetKind::Flow,
                    &function.name,
                    format!(
                        "argument {} is not assignable to parameter {} of '{}'",
                        argument, parameter, flow.target
                    ),
                );
            }
        }

        Some(FlowMeta {
            target,
            strategy: flow.strategy,
        })
    }

    fn resolve_escalations(
        &mut self,
        owner: &str,
        declared: &EscalationProcedure<String>,
        functions: &[FunctionDescriptor],
        index: &HashMap<String, usize>,
    ) -> EscalationProcedure<usize> {
        let mut resolved = EscalationProcedure::new();
        for escalation in declared.escalations() {
            let Some(&handler) = index.get(&escalation.handler) else {
                self.issue(
                    AssetKind::Escalation,
                    owner,
                    format!("{} is handled by unknown function '{}'", escalation.kind, escalation.handler),
                );
                continue;
            };

            let parameter = &functions[handler].parameter;
            if !escalation.kind.is_assignable_to(parameter) && *parameter != TypeKey::of::<Cause>() {
                self.issue(
                    AssetKind::Escalation,
                    owner,
                    format!(
                        "handler '{}' takes {} and can not receive {}",
                        escalation.handler, parameter, escalation.kind
                    ),
                );
            }
            resolved.push(escalation.kind.clone(), handler);
        }
        resolved
    }
}

/// Objects that close a dependency cycle.
fn find_cycles(objects: &[ObjectMeta]) -> Vec<usize> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        New,
        Active,
        Done,
    }

    fn visit(node: usize, objects: &[ObjectMeta], marks: &mut [Mark], cyclic: &mut HashSet<usize>) {
        marks[node] = Mark::Active;
        for &dependency in &objects[node].dependencies {
            match marks[dependency] {
                Mark::New => visit(dependency, objects, marks, cyclic),
                Mark::Active => {
                    cyclic.insert(node);
                }
                Mark::Done => {}
            }
        }
        marks[node] = Mark::Done;
    }

    let mut marks = vec![Mark::New; objects.len()];
    let mut cyclic = HashSet::new();
    for node in 0..objects.len() {
        if marks[node] == Mark::New {
            visit(node, objects, &mut marks, &mut cyclic);
        }
    }

    let mut cyclic: Vec<_> = cyclic.into_iter().collect();
    cyclic.sort_unstable();
    cyclic
}

/// Declared objects with their transitive dependencies, dependencies first.
fn load_order(declared: &[usize], objects: &[ObjectMeta]) -> Vec<usize> {
    fn visit(node: usize, objects: &[ObjectMeta], seen: &mut HashSet<usize>, order: &mut Vec<usize>) {
        if !seen.insert(node) {
            return;
        }
        for &dependency in &objects[node].dependencies {
            visit(dependency, objects, seen, order);
        }
        order.push(node);
    }

    let mut seen = HashSet::new();
    let mut order = Vec::new();
    for &object in declared {
        visit(object, objects, &mut seen, &mut order);
    }
    order
}
