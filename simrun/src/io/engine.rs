//! Execution engine abstraction.
//!
//! The orchestrator only fills an engine's job queue and implements the
//! lifecycle hooks the engine calls around execution. [`SerialEngine`] is a
//! minimal engine that runs every job on the calling thread; real deployments
//! plug in their own parallel or distributed engine.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::discovery::{RunnableUnit, UnitPayload};

/// Job queue side of an execution engine.
pub trait ExecutionEngine: Send + Sync {
    fn add_job(&self, unit: RunnableUnit);

    fn queued_jobs(&self) -> usize;
}

/// Callbacks an engine invokes at phase boundaries.
pub trait RunHooks: Send + Sync {
    /// Called once, before the first job starts.
    fn before_any_job_runs(&self);

    /// Called once, after every job has finished.
    fn after_all_jobs_complete(&self);
}

/// A job that returned an error while the engine ran it.
#[derive(Debug)]
pub struct JobFailure {
    pub job: String,
    pub error: anyhow::Error,
}

/// Engine that drains its queue in order on the current thread.
#[derive(Debug, Default)]
pub struct SerialEngine {
    queue: Mutex<VecDeque<RunnableUnit>>,
}

impl SerialEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the queued jobs, in queue order.
    pub fn queued_names(&self) -> Vec<String> {
        self.lock().iter().map(|unit| unit.name.clone()).collect()
    }

    /// Run every queued job between the two lifecycle hooks.
    ///
    /// Jobs are popped only after `before_any_job_runs` returns, so jobs queued
    /// by background discovery are all visible by then.
    #[instrument(skip_all)]
    pub fn run<F>(&self, hooks: &dyn RunHooks, mut execute: F) -> Vec<JobFailure>
    where
        F: FnMut(&RunnableUnit) -> Result<()>,
    {
        hooks.before_any_job_runs();

        let mut failures = Vec::new();
        let mut executed = 0usize;
        while let Some(unit) = self.pop() {
            debug!(job = %unit.name, "running job");
            executed += 1;
            if let Err(error) = execute(&unit) {
                warn!(job = %unit.name, error = %format!("{error:#}"), "job failed");
                failures.push(JobFailure {
                    job: unit.name.clone(),
                    error,
                });
            }
        }
        info!(executed, failed = failures.len(), "all jobs complete");

        hooks.after_all_jobs_complete();
        failures
    }

    fn pop(&self) -> Option<RunnableUnit> {
        self.lock().pop_front()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<RunnableUnit>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ExecutionEngine for SerialEngine {
    fn add_job(&self, unit: RunnableUnit) {
        self.lock().push_back(unit);
    }

    fn queued_jobs(&self) -> usize {
        self.lock().len()
    }
}

/// Default job body: run direct jobs, treat simulation payloads as opaque.
pub fn run_direct_jobs(unit: &RunnableUnit) -> Result<()> {
    match &unit.payload {
        UnitPayload::Direct(job) => job.run(),
        UnitPayload::NoOp => Ok(()),
        UnitPayload::Simulation { path } | UnitPayload::Generated { path, .. } => {
            debug!(job = %unit.name, path = %path, "simulation payload has no local executor");
            Ok(())
        }
    }
}
