//! Error types recorded by the orchestrator.
//!
//! - [`DiscoveryError`]: the job set could not be computed. The run still
//!   proceeds with a no-op unit.
//! - [`ResolveError`]: a unit's required service is missing. Fails that unit only.
//! - [`RunError`]: an entry of the run's error list, carrying enough context to
//!   identify the offending file or unit.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::core::phase::RunPhase;

/// A simulation name shared by more than one node of the same type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Duplicate {
    pub type_name: String,
    pub name: String,
    pub count: usize,
}

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("model file {} does not exist", .0.display())]
    MissingSource(PathBuf),

    #[error("duplicate simulation names: {}", describe_duplicates(.0))]
    DuplicateNames(Vec<Duplicate>),

    #[error("malformed model definition: {0}")]
    Malformed(String),

    #[error("invalid simulation name pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("generator {path} failed: {cause:#}")]
    Generator { path: String, cause: anyhow::Error },

    #[error("discovery did not complete within {0:?}")]
    Timeout(Duration),

    #[error("discovery wait was cancelled")]
    Cancelled,
}

impl DiscoveryError {
    /// Short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            DiscoveryError::MissingSource(_) => "missing_source",
            DiscoveryError::DuplicateNames(_) => "duplicate_names",
            DiscoveryError::Malformed(_) => "malformed",
            DiscoveryError::InvalidPattern(_) => "invalid_pattern",
            DiscoveryError::Generator { .. } => "generator",
            DiscoveryError::Timeout(_) => "timeout",
            DiscoveryError::Cancelled => "cancelled",
        }
    }

    /// Duplicate names reported by this error, if any.
    pub fn duplicate_names(&self) -> Vec<&str> {
        match self {
            DiscoveryError::DuplicateNames(duplicates) => duplicates
                .iter()
                .map(|duplicate| duplicate.name.as_str())
                .collect(),
            _ => Vec::new(),
        }
    }
}

fn describe_duplicates(duplicates: &[Duplicate]) -> String {
    duplicates
        .iter()
        .map(|duplicate| {
            format!(
                "{} '{}' x{}",
                duplicate.type_name, duplicate.name, duplicate.count
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("required service {type_name} is not available")]
    Missing { type_name: &'static str },
}

/// One entry of the run's error list.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RunError {
    /// Discovery failed; `source_id` names the model file or in-memory root.
    #[error("{source_id}: {error}")]
    Discovery {
        source_id: String,
        error: DiscoveryError,
    },

    #[error("post-simulation tool {unit} failed: {cause:#}")]
    Tool { unit: String, cause: anyhow::Error },

    #[error("test {unit} failed: {cause:#}")]
    Test { unit: String, cause: anyhow::Error },

    #[error("run cancelled during {phase}")]
    Cancelled { phase: RunPhase },
}

impl RunError {
    /// Name of the unit or source the error is attributed to.
    pub fn subject(&self) -> String {
        match self {
            RunError::Discovery { source_id, .. } => source_id.clone(),
            RunError::Tool { unit, .. } | RunError::Test { unit, .. } => unit.clone(),
            RunError::Cancelled { phase } => phase.to_string(),
        }
    }

    pub fn as_discovery(&self) -> Option<&DiscoveryError> {
        match self {
            RunError::Discovery { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Dependency failure behind a tool or test error, if that is what failed.
    pub fn as_resolve(&self) -> Option<&ResolveError> {
        match self {
            RunError::Tool { cause, .. } | RunError::Test { cause, .. } => cause.downcast_ref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_names_are_listed_in_message() {
        let err = DiscoveryError::DuplicateNames(vec![
            Duplicate {
                type_name: "Simulation".to_string(),
                name: "Sim1".to_string(),
                count: 2,
            },
            Duplicate {
                type_name: "Experiment".to_string(),
                name: "Exp".to_string(),
                count: 3,
            },
        ]);
        assert_eq!(
            err.to_string(),
            "duplicate simulation names: Simulation 'Sim1' x2, Experiment 'Exp' x3"
        );
        assert_eq!(err.duplicate_names(), vec!["Sim1", "Exp"]);
    }

    #[test]
    fn resolve_error_is_recoverable_from_unit_error() {
        let err = RunError::Test {
            unit: "Check1".to_string(),
            cause: ResolveError::Missing { type_name: "Clock" }.into(),
        };
        assert_eq!(
            err.as_resolve(),
            Some(&ResolveError::Missing { type_name: "Clock" })
        );
        assert!(err.to_string().starts_with("test Check1 failed"));
    }
}
