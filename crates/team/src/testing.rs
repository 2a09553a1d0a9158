//! Jobs shared by team tests.

use crate::job::{Job, JobContext};
use conductor_core::ProcessId;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Reports "not complete" a fixed number of times, then completes.
pub struct CountdownJob {
    process: ProcessId,
    remaining: usize,
    runs: Arc<AtomicUsize>,
    done: Option<oneshot::Sender<()>>,
}

impl CountdownJob {
    pub fn new(repeats: usize, runs: Arc<AtomicUsize>, done: Option<oneshot::Sender<()>>) -> Self {
        Self {
            process: ProcessId::new(),
            remaining: repeats,
            runs,
            done,
        }
    }
}

impl Job for CountdownJob {
    fn process_id(&self) -> ProcessId {
        self.process
    }

    fn do_job(&mut self, _context: &JobContext) -> bool {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if self.remaining > 0 {
            self.remaining -= 1;
            return false;
        }
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
        true
    }
}

/// Never completes; counts how often it was dropped.
pub struct StuckJob {
    process: ProcessId,
    dropped: Arc<AtomicUsize>,
}

impl StuckJob {
    pub fn new(dropped: Arc<AtomicUsize>) -> Self {
        Self {
            process: ProcessId::new(),
            dropped,
        }
    }
}

impl Job for StuckJob {
    fn process_id(&self) -> ProcessId {
        self.process
    }

    fn do_job(&mut self, _context: &JobContext) -> bool {
        false
    }
}

impl Drop for StuckJob {
    fn drop(&mut self) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
    }
}
