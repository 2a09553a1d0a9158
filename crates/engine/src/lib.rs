//! Conductor engine: sections of managed functions executed as processes.
//!
//! A [`Section`] groups managed functions, the flows between them, the
//! managed objects they use and the escalation procedures that handle
//! their failures. Invoking a function starts a process. A process runs one
//! or more ThreadStates, each a mutually exclusive set of flows executed by
//! the teams the functions are assigned to.
//!
//! ```no_run
//! use conductor_engine::{
//!     Conductor, ConductorConfig, FunctionDescriptor, ProcessInput, SectionBuilder, Step,
//! };
//!
//! let mut conductor = Conductor::new(ConductorConfig::default()).unwrap();
//! conductor.add_section(
//!     SectionBuilder::new("greeting").function(
//!         FunctionDescriptor::new("hello", |ctx| {
//!             let name = ctx.parameter::<String>()?;
//!             println!("hello {name}");
//!             Ok(Step::Done)
//!         })
//!         .parameter::<String>(),
//!     ),
//! );
//! conductor.open().unwrap();
//!
//! let section = conductor.section("greeting").unwrap();
//! let handle = section
//!     .invoke_process("hello", ProcessInput::with("world".to_string()))
//!     .unwrap();
//! handle.wait_blocking().unwrap();
//! ```

#![warn(missing_docs)]

mod conductor;
mod config;
mod error;
mod flow;
mod function;
mod object;
mod process;
mod runner;
mod section;
mod thread;

pub use conductor::{Conductor, OpenReport};
pub use config::ConductorConfig;
pub use error::{ConductorError, ConfigError, InvokeError};
pub use flow::{FlowCallback, FlowDescriptor, FlowStrategy};
pub use function::{FunctionContext, FunctionDescriptor, FunctionResult, ManagedFunction, Step};
pub use object::{ObjectDescriptor, ObjectProvider, ObjectScope};
pub use process::{
    ProcessCallback, ProcessHandle, ProcessInput, ProcessLifecycle, ProcessOutcome, ProcessSummary,
};
pub use section::{Section, SectionBuilder};

pub use conductor_core::{
    kinds, value, AssetKind, Cause, EscalationHandler, Issue, IssueCollector, Issues,
    PlatformEscalationHandler, ProcessId, ProcessListener, TypeKey, Value,
};
pub use conductor_resource::{
    AsyncListener, Capabilities, Dependencies, FnSource, ManagedObject, ManagedObjectPool,
    ManagedObjectSource, ObjectUser, PlainObject, SourceResult,
};
pub use conductor_team::{ContextBridgeTeam, Team, TeamConfig, TeamKind};
