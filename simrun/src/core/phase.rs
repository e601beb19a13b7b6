//! Run lifecycle phases and the status text shown to observers.

use std::fmt;

use serde::{Deserialize, Serialize};

pub const STATUS_FINDING: &str = "Finding simulations to run";
pub const STATUS_WAITING_FOR_STORAGE: &str = "Waiting for datastore to finish writing";
pub const STATUS_RUNNING_SIMULATIONS: &str = "Running simulations";
pub const STATUS_RUNNING_TESTS: &str = "Running tests";
pub const STATUS_COMPLETE: &str = "Complete";

pub fn running_tool_status(name: &str) -> String {
    format!("Running post-simulation tool {name}")
}

/// Phases of a run, in the only order they can occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Discovering,
    AwaitingExecution,
    Executing,
    PostProcessing,
    Validating,
    Complete,
}

impl RunPhase {
    /// True if moving from `self` to `next` keeps the sequence monotonic.
    ///
    /// Phases may be skipped by configuration but never revisited.
    pub fn can_advance_to(self, next: RunPhase) -> bool {
        next > self
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunPhase::Discovering => "discovering",
            RunPhase::AwaitingExecution => "awaiting execution",
            RunPhase::Executing => "executing",
            RunPhase::PostProcessing => "post-processing",
            RunPhase::Validating => "validating",
            RunPhase::Complete => "complete",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_only_advance_forward() {
        assert!(RunPhase::Discovering.can_advance_to(RunPhase::AwaitingExecution));
        assert!(RunPhase::Executing.can_advance_to(RunPhase::Validating));
        assert!(!RunPhase::Complete.can_advance_to(RunPhase::Executing));
        assert!(!RunPhase::Validating.can_advance_to(RunPhase::Validating));
    }
}
