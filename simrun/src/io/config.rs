//! Run options stored as TOML (`simrun.toml`).

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::filter::DiscoveryFilter;
use crate::error::DiscoveryError;

/// Options fixed when a run is constructed.
///
/// Missing fields default to running every phase over every simulation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunOptions {
    /// Queue discovered simulations on the execution engine.
    pub run_simulations: bool,

    /// Run post-simulation tools after all jobs complete.
    pub run_post_simulation_tools: bool,

    /// Run validation tests after post-processing.
    pub run_tests: bool,

    /// Exact simulation names to run. Ignored when a pattern is set.
    pub simulation_names: Option<Vec<String>>,

    /// Pattern simulation names must match in full.
    pub simulation_name_pattern: Option<String>,

    /// Path of the node to run, relative to the model root (`Simulations/Sim1`).
    pub scope: Option<String>,

    /// Upper bound on how long a phase waits for discovery.
    pub discovery_timeout_ms: u64,

    /// Spin iterations before a discovery waiter blocks.
    pub spin_limit: u32,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            run_simulations: true,
            run_post_simulation_tools: true,
            run_tests: true,
            simulation_names: None,
            simulation_name_pattern: None,
            scope: None,
            discovery_timeout_ms: 60_000,
            spin_limit: 1_000,
        }
    }
}

impl RunOptions {
    pub fn validate(&self) -> Result<()> {
        if self.discovery_timeout_ms == 0 {
            return Err(anyhow!("discovery_timeout_ms must be > 0"));
        }
        if let Some(names) = &self.simulation_names
            && names.iter().any(|name| name.trim().is_empty())
        {
            return Err(anyhow!("simulation_names must not contain empty names"));
        }
        if let Some(scope) = &self.scope
            && scope.trim().is_empty()
        {
            return Err(anyhow!("scope must not be empty when set"));
        }
        Ok(())
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    /// Filter described by `simulation_names` / `simulation_name_pattern`.
    pub fn filter(&self) -> Result<DiscoveryFilter, DiscoveryError> {
        DiscoveryFilter::from_selection(
            self.simulation_names.as_deref(),
            self.simulation_name_pattern.as_deref(),
        )
    }
}

/// Load options from a TOML file.
///
/// If the file is missing, returns `RunOptions::default()`.
pub fn load_options(path: &Path) -> Result<RunOptions> {
    if !path.exists() {
        let options = RunOptions::default();
        options.validate()?;
        return Ok(options);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let options: RunOptions =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    options.validate()?;
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let options = load_options(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(options, RunOptions::default());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("simrun.toml");
        fs::write(&path, "run_tests = false\nsimulation_name_pattern = \"Sim.*\"\n")
            .expect("write");
        let options = load_options(&path).expect("load");
        assert!(!options.run_tests);
        assert!(options.run_simulations);
        assert!(options.filter().expect("filter").matches("Sim7"));
    }

    #[test]
    fn pattern_takes_precedence_over_names() {
        let options = RunOptions {
            simulation_names: Some(vec!["Sim1".to_string()]),
            simulation_name_pattern: Some("Exp.*".to_string()),
            ..RunOptions::default()
        };
        let filter = options.filter().expect("filter");
        assert!(filter.matches("ExpN0"));
        assert!(!filter.matches("Sim1"));
    }

    #[test]
    fn invalid_pattern_is_reported_as_discovery_error() {
        let options = RunOptions {
            simulation_name_pattern: Some("(".to_string()),
            ..RunOptions::default()
        };
        let err = options.filter().expect_err("invalid pattern");
        assert_eq!(err.as_label(), "invalid_pattern");
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let options = RunOptions {
            discovery_timeout_ms: 0,
            ..RunOptions::default()
        };
        let err = options.validate().expect_err("invalid");
        assert!(err.to_string().contains("discovery_timeout_ms"));
    }
}
