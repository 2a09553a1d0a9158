//! Process lifecycle hooks for external adapters.

use crate::id::ProcessId;

/// Observes ProcessState creation and completion.
///
/// `process_created` is called on the execution context that invoked the
/// process, before any of its jobs are assigned. `process_completed` is
/// called on whichever context completes the last ThreadState.
pub trait ProcessListener: Send + Sync {
    /// A ProcessState was created.
    fn process_created(&self, process: ProcessId);

    /// A ProcessState completed and released its resources.
    fn process_completed(&self, process: ProcessId);
}
