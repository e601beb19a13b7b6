//! Observable state of a run: phase, status text, and the error list.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::core::phase::{RunPhase, STATUS_FINDING};
use crate::error::RunError;

/// Append-only list of errors encountered during a run.
///
/// Cloning yields another handle to the same list.
#[derive(Debug, Clone, Default)]
pub struct ErrorLog {
    entries: Arc<Mutex<Vec<Arc<RunError>>>>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, error: RunError) {
        warn!(subject = %error.subject(), error = %error, "run error recorded");
        lock(&self.entries).push(Arc::new(error));
    }

    pub fn extend(&self, errors: impl IntoIterator<Item = RunError>) {
        for error in errors {
            self.push(error);
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    /// Copy of the entries recorded so far, in recording order.
    pub fn snapshot(&self) -> Vec<Arc<RunError>> {
        lock(&self.entries).clone()
    }

    pub fn messages(&self) -> Vec<String> {
        lock(&self.entries)
            .iter()
            .map(|error| error.to_string())
            .collect()
    }
}

#[derive(Debug)]
pub struct RunState {
    status: Mutex<String>,
    phase: Mutex<RunPhase>,
    errors: ErrorLog,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            status: Mutex::new(STATUS_FINDING.to_string()),
            phase: Mutex::new(RunPhase::Discovering),
            errors: ErrorLog::new(),
        }
    }
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the status text; the last writer wins.
    pub fn set_status(&self, status: impl Into<String>) {
        let status = status.into();
        debug!(status = %status, "status");
        *lock(&self.status) = status;
    }

    pub fn status(&self) -> String {
        lock(&self.status).clone()
    }

    pub fn phase(&self) -> RunPhase {
        *lock(&self.phase)
    }

    /// Move to `next`. Returns `false` (and leaves the phase alone) when that
    /// would not move the run forward.
    pub fn advance(&self, next: RunPhase) -> bool {
        let mut phase = lock(&self.phase);
        if !phase.can_advance_to(next) {
            debug!(current = %*phase, requested = %next, "phase change ignored");
            return false;
        }
        debug!(from = %*phase, to = %next, "phase change");
        *phase = next;
        true
    }

    pub fn errors(&self) -> &ErrorLog {
        &self.errors
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
