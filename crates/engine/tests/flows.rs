use conductor_engine::{
    value, Conductor, ConductorConfig, FlowDescriptor, FunctionContext, FunctionDescriptor,
    FunctionResult, InvokeError, ProcessId, ProcessInput, ProcessLifecycle, ProcessListener,
    ProcessOutcome, SectionBuilder, Step, TeamConfig, TeamKind,
};
use rand::Rng;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn active_config(workers: usize) -> ConductorConfig {
    ConductorConfig::default()
        .with_team(TeamConfig::new("workers", TeamKind::Active).workers(workers))
        .with_default_team("workers")
}

fn recorder(order: Arc<Mutex<Vec<String>>>) -> impl Fn(&mut FunctionContext<'_>) -> FunctionResult + Send + Sync {
    move |ctx| {
        let label = match ctx.parameter::<String>() {
            Ok(label) => format!("{}:{}", ctx.name(), label),
            Err(_) => ctx.name().to_string(),
        };
        order.lock().unwrap().push(label);
        Ok(Step::Done)
    }
}

#[test]
fn test_next_flow_runs_inline_on_passive_team() {
    let observed = Arc::new(Mutex::new(Vec::new()));
    let seen = observed.clone();

    let mut conductor = Conductor::new(ConductorConfig::default()).unwrap();
    conductor.add_section(
        SectionBuilder::new("chain")
            .function(
                FunctionDescriptor::new("a", |ctx| {
                    ctx.set_next_argument(value(5i32));
                    Ok(Step::Done)
                })
                .next(FlowDescriptor::sequential("b").argument::<i32>()),
            )
            .function(
                FunctionDescriptor::new("b", move |ctx| {
                    let argument = *ctx.parameter::<i32>()?;
                    seen.lock().unwrap().push((argument, std::thread::current().id()));
                    Ok(Step::Done)
                })
                .parameter::<i32>(),
            ),
    );
    conductor.open().unwrap();

    let section = conductor.section("chain").unwrap();
    let handle = section.invoke_process("a", ProcessInput::new()).unwrap();

    // Passive team: everything ran before invoke returned.
    assert_eq!(handle.lifecycle(), ProcessLifecycle::Complete);
    let summary = handle.wait_blocking().unwrap();
    assert!(summary.outcome.is_completed());

    let observed = observed.lock().unwrap();
    assert_eq!(observed.len(), 1);
    assert_eq!(observed[0], (5, std::thread::current().id()));
}

#[test]
fn test_invoked_sequential_flows_run_before_next() {
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut conductor = Conductor::new(ConductorConfig::default()).unwrap();
    conductor.add_section(
        SectionBuilder::new("order")
            .function(
                FunctionDescriptor::new("start", |ctx| {
                    ctx.do_flow(0, Some(value("one".to_string())))?;
                    ctx.do_flow(0, Some(value("two".to_string())))?;
                    Ok(Step::Done)
                })
                .flow(FlowDescriptor::sequential("step").argument::<String>())
                .next(FlowDescriptor::sequential("end")),
            )
            .function(FunctionDescriptor::new("step", recorder(order.clone())).parameter::<String>())
            .function(FunctionDescriptor::new("end", recorder(order.clone()))),
    );
    conductor.open().unwrap();

    let section = conductor.section("order").unwrap();
    section
        .invoke_process("start", ProcessInput::new())
        .unwrap()
        .wait_blocking()
        .unwrap();

    assert_eq!(*order.lock().unwrap(), vec!["step:one", "step:two", "end"]);
}

#[test]
fn test_parallel_flows_join_with_repeats() {
    const FLOWS: usize = 8;

    let executions = Arc::new(AtomicUsize::new(0));
    let joined = Arc::new(AtomicUsize::new(0));
    let expected = Arc::new(AtomicUsize::new(0));

    let mut conductor = Conductor::new(active_config(3)).unwrap();
    let fan_joined = joined.clone();
    let fan_expected = expected.clone();
    let worker_executions = executions.clone();
    conductor.add_section(
        SectionBuilder::new("fan")
            .function(
                FunctionDescriptor::new("fan", move |ctx| {
                    let mut rng = rand::thread_rng();
                    for _ in 0..FLOWS {
                        let repeats: usize = rng.gen_range(0..5);
                        fan_expected.fetch_add(repeats + 1, Ordering::SeqCst);
                        let joined = fan_joined.clone();
                        ctx.do_flow_with_callback(
                            0,
                            Some(value(AtomicUsize::new(repeats))),
                            move |failure| {
                                assert!(failure.is_none());
                                joined.fetch_add(1, Ordering::SeqCst);
                            },
                        )?;
                    }
                    Ok(Step::Done)
                })
                .flow(FlowDescriptor::parallel("work").argument::<AtomicUsize>()),
            )
            .function(
                FunctionDescriptor::new("work", move |ctx| {
                    worker_executions.fetch_add(1, Ordering::SeqCst);
                    let remaining = ctx.parameter::<AtomicUsize>()?;
                    if remaining.load(Ordering::SeqCst) > 0 {
                        remaining.fetch_sub(1, Ordering::SeqCst);
                        return Ok(Step::Again);
                    }
                    Ok(Step::Done)
                })
                .parameter::<AtomicUsize>(),
            ),
    );
    conductor.open().unwrap();

    let section = conductor.section("fan").unwrap();
    let summary = section
        .invoke_process("fan", ProcessInput::new())
        .unwrap()
        .wait_blocking()
        .unwrap();

    assert!(summary.outcome.is_completed());
    assert_eq!(joined.load(Ordering::SeqCst), FLOWS);
    assert_eq!(executions.load(Ordering::SeqCst), expected.load(Ordering::SeqCst));
}

#[test]
fn test_spawned_flows_run_in_new_thread_states() {
    const CHILDREN: usize = 5;

    let threads = Arc::new(Mutex::new(HashSet::new()));
    let callbacks = Arc::new(AtomicUsize::new(0));

    let mut conductor = Conductor::new(active_config(2)).unwrap();
    let parent_threads = threads.clone();
    let parent_callbacks = callbacks.clone();
    let child_threads = threads.clone();
    conductor.add_section(
        SectionBuilder::new("spawn")
            .function(
                FunctionDescriptor::new("parent", move |ctx| {
                    parent_threads.lock().unwrap().insert(ctx.thread_id());
                    for _ in 0..CHILDREN {
                        let callbacks = parent_callbacks.clone();
                        ctx.do_flow_with_callback(0, None, move |_| {
                            callbacks.fetch_add(1, Ordering::SeqCst);
                        })?;
                    }
                    Ok(Step::Done)
                })
                .flow(FlowDescriptor::spawn("child")),
            )
            .function(FunctionDescriptor::new("child", move |ctx| {
                child_threads.lock().unwrap().insert(ctx.thread_id());
                Ok(Step::Done)
            })),
    );
    conductor.open().unwrap();

    let section = conductor.section("spawn").unwrap();
    let summary = section
        .invoke_process("parent", ProcessInput::new())
        .unwrap()
        .wait_blocking()
        .unwrap();

    assert!(summary.outcome.is_completed());
    assert_eq!(threads.lock().unwrap().len(), CHILDREN + 1);
    assert_eq!(callbacks.load(Ordering::SeqCst), CHILDREN);
}

#[test]
fn test_function_hands_off_between_teams() {
    let threads = Arc::new(Mutex::new(Vec::new()));
    let config = active_config(1)
        .with_team(TeamConfig::new("other", TeamKind::Active).workers(1))
        .with_default_team("workers");

    let mut conductor = Conductor::new(config).unwrap();
    let first = threads.clone();
    let second = threads.clone();
    conductor.add_section(
        SectionBuilder::new("handoff")
            .function(
                FunctionDescriptor::new("first", move |_| {
                    first.lock().unwrap().push(std::thread::current().id());
                    Ok(Step::Done)
                })
                .next(FlowDescriptor::sequential("second")),
            )
            .function(
                FunctionDescriptor::new("second", move |_| {
                    second.lock().unwrap().push(std::thread::current().id());
                    Ok(Step::Done)
                })
                .team("other"),
            ),
    );
    conductor.open().unwrap();

    let section = conductor.section("handoff").unwrap();
    section
        .invoke_process("first", ProcessInput::new())
        .unwrap()
        .wait_blocking()
        .unwrap();

    let threads = threads.lock().unwrap();
    assert_eq!(threads.len(), 2);
    assert_ne!(threads[0], threads[1]);
}

#[test]
fn test_delayed_invocation() {
    let mut conductor = Conductor::new(ConductorConfig::default()).unwrap();
    conductor.add_section(SectionBuilder::new("later").function(FunctionDescriptor::new("tick", |_| Ok(Step::Done))));
    conductor.open().unwrap();

    let section = conductor.section("later").unwrap();
    let started = Instant::now();
    let handle = section
        .invoke_process("tick", ProcessInput::new().delay(Duration::from_millis(50)))
        .unwrap();
    assert_ne!(handle.lifecycle(), ProcessLifecycle::Complete);

    let summary = handle.wait_blocking().unwrap();
    assert!(summary.outcome.is_completed());
    assert!(started.elapsed() >= Duration::from_millis(50));
}

#[derive(Default)]
struct CompletedProcesses(Mutex<Vec<ProcessId>>);

impl ProcessListener for CompletedProcesses {
    fn process_created(&self, _process: ProcessId) {}

    fn process_completed(&self, process: ProcessId) {
        self.0.lock().unwrap().push(process);
    }
}

#[test]
fn test_close_cancels_delayed_process() {
    let ran = Arc::new(AtomicUsize::new(0));
    let callbacks = Arc::new(AtomicUsize::new(0));
    let listener = Arc::new(CompletedProcesses::default());

    let mut conductor = Conductor::new(ConductorConfig::default()).unwrap();
    conductor.add_process_listener(listener.clone());
    let counter = ran.clone();
    conductor.add_section(SectionBuilder::new("later").function(FunctionDescriptor::new("tick", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Step::Done)
    })));
    conductor.open().unwrap();

    let completed = callbacks.clone();
    let handle = conductor
        .section("later")
        .unwrap()
        .invoke_process(
            "tick",
            ProcessInput::new()
                .delay(Duration::from_secs(3600))
                .on_complete(move |_| {
                    completed.fetch_add(1, Ordering::SeqCst);
                }),
        )
        .unwrap();
    let id = handle.id();

    conductor.close();
    let summary = handle.wait_blocking().unwrap();

    assert!(matches!(summary.outcome, ProcessOutcome::Cancelled));
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(callbacks.load(Ordering::SeqCst), 1);
    assert_eq!(*listener.0.lock().unwrap(), vec![id]);
}

#[test]
fn test_alternating_passive_teams_run_in_constant_stack() {
    const HAND_OFFS: usize = 10_000;

    let runs = Arc::new(AtomicUsize::new(0));
    let counted = runs.clone();

    std::thread::Builder::new()
        .stack_size(1024 * 1024)
        .spawn(move || {
            let config = ConductorConfig::default().with_team(TeamConfig::new("other", TeamKind::Passive));
            let mut conductor = Conductor::new(config).unwrap();
            let ping_runs = counted.clone();
            let pong_runs = counted.clone();
            conductor.add_section(
                SectionBuilder::new("relay")
                    .function(
                        FunctionDescriptor::new("ping", move |ctx| {
                            ping_runs.fetch_add(1, Ordering::SeqCst);
                            let remaining = *ctx.parameter::<usize>()?;
                            if remaining > 0 {
                                ctx.do_flow(0, Some(value(remaining - 1)))?;
                            }
                            Ok(Step::Done)
                        })
                        .parameter::<usize>()
                        .flow(FlowDescriptor::sequential("pong").argument::<usize>()),
                    )
                    .function(
                        FunctionDescriptor::new("pong", move |ctx| {
                            pong_runs.fetch_add(1, Ordering::SeqCst);
                            let remaining = *ctx.parameter::<usize>()?;
                            if remaining > 0 {
                                ctx.do_flow(0, Some(value(remaining - 1)))?;
                            }
                            Ok(Step::Done)
                        })
                        .parameter::<usize>()
                        .team("other")
                        .flow(FlowDescriptor::sequential("ping").argument::<usize>()),
                    ),
            );
            conductor.open().unwrap();

            let handle = conductor
                .section("relay")
                .unwrap()
                .invoke_process("ping", ProcessInput::with(HAND_OFFS))
                .unwrap();
            // Both teams are passive: the whole relay ran inside invoke.
            assert_eq!(handle.lifecycle(), ProcessLifecycle::Complete);
            assert!(handle.wait_blocking().unwrap().outcome.is_completed());
        })
        .unwrap()
        .join()
        .unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), HAND_OFFS + 1);
}

#[test]
fn test_completion_callback_and_typed_invocation() {
    let completed = Arc::new(Mutex::new(None));
    let slot = completed.clone();

    let mut conductor = Conductor::new(ConductorConfig::default()).unwrap();
    conductor.add_section(
        SectionBuilder::new("typed").function(
            FunctionDescriptor::new("double", |ctx| {
                let n = *ctx.parameter::<u64>()?;
                assert_eq!(n * 2, 42);
                Ok(Step::Done)
            })
            .parameter::<u64>(),
        ),
    );
    conductor.open().unwrap();
    let section = conductor.section("typed").unwrap();

    let err = section.invoke_process("double", ProcessInput::with("21")).unwrap_err();
    assert!(matches!(err, InvokeError::ParameterType { .. }));

    let err = section.invoke_process("triple", ProcessInput::new()).unwrap_err();
    assert!(matches!(err, InvokeError::UnknownFunction(_, _)));

    let handle = section
        .invoke_process(
            "double",
            ProcessInput::with(21u64).on_complete(move |summary| {
                *slot.lock().unwrap() = Some(summary.id);
            }),
        )
        .unwrap();
    let id = handle.id();
    handle.wait_blocking().unwrap();
    assert_eq!(*completed.lock().unwrap(), Some(id));
}

#[tokio::test]
async fn test_wait_from_async_context() {
    let mut conductor = Conductor::new(ConductorConfig::default()).unwrap();
    conductor.add_section(
        SectionBuilder::new("async").function(FunctionDescriptor::new("noop", |_| Ok(Step::Done))),
    );
    conductor.open().unwrap();

    let section = conductor.section("async").unwrap();
    let handle = section
        .invoke_process("noop", ProcessInput::new().delay(Duration::from_millis(10)))
        .unwrap();
    let summary = handle.wait().await.unwrap();
    assert!(summary.outcome.is_completed());
    assert!(summary.completed >= summary.started);

    conductor.close();
}
