//! Conductor core types.
//!
//! Identifiers, hierarchical type keys, escalation causes and procedures,
//! configuration issue collection and the process lifecycle hook shared
//! by every layer of the runtime.

#![warn(missing_docs)]

mod id;
mod type_key;
mod cause;
mod escalation;
mod issues;
mod listener;
mod value;

pub mod sync;

pub use id::*;
pub use type_key::TypeKey;
pub use cause::{kinds, Cause};
pub use escalation::{
    Escalation, EscalationHandler, EscalationProcedure, LoggingEscalationHandler,
    PlatformEscalationHandler,
};
pub use issues::{AssetKind, Issue, IssueCollector, Issues, LoggingIssues};
pub use listener::ProcessListener;
pub use value::{value, Value};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
