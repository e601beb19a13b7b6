//! Resolve-then-run for a single tool or test, with panic isolation.

use std::panic::{AssertUnwindSafe, catch_unwind};

use anyhow::{Result, anyhow};

use crate::core::services::{Dependency, Resolved, ServiceSet};

/// Resolve `dependencies` against `services`, then call `run`.
///
/// Resolution failures and panics both come back as errors so that one unit
/// cannot take its siblings down with it.
pub(crate) fn resolve_and_run<D, R>(services: &ServiceSet, dependencies: D, run: R) -> Result<()>
where
    D: FnOnce() -> Vec<Dependency>,
    R: FnOnce(&Resolved) -> Result<()>,
{
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let resolved = services.resolve(&dependencies())?;
        run(&resolved)
    }));
    match outcome {
        Ok(result) => result,
        Err(panic) => {
            let message = if let Some(msg) = panic.downcast_ref::<&'static str>() {
                (*msg).to_string()
            } else if let Some(msg) = panic.downcast_ref::<String>() {
                msg.clone()
            } else {
                "unknown panic".to_string()
            };
            Err(anyhow!("panicked: {message}"))
        }
    }
}
