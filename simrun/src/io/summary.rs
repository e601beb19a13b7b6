//! Run summary written after a run completes (`simrun run --summary`).

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::phase::RunPhase;
use crate::error::RunError;

/// Final state of a run, as persisted JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunSummary {
    /// Model file path, or root name for in-memory trees.
    pub source: String,
    pub status: String,
    pub phase: RunPhase,
    pub succeeded: bool,
    pub errors: Vec<ErrorEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorEntry {
    /// File, tool or test the error is attributed to.
    pub subject: String,
    pub message: String,
}

impl RunSummary {
    pub fn new(
        source: impl Into<String>,
        status: impl Into<String>,
        phase: RunPhase,
        errors: &[Arc<RunError>],
    ) -> Self {
        let errors: Vec<ErrorEntry> = errors
            .iter()
            .map(|error| ErrorEntry {
                subject: error.subject(),
                message: error.to_string(),
            })
            .collect();
        Self {
            source: source.into(),
            status: status.into(),
            phase,
            succeeded: phase == RunPhase::Complete && errors.is_empty(),
            errors,
        }
    }
}

/// Load a summary written by [`write_summary`].
pub fn load_summary(path: &Path) -> Result<RunSummary> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read summary {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse summary {}", path.display()))
}

/// Atomically write the summary to disk (temp file + rename).
pub fn write_summary(path: &Path, summary: &RunSummary) -> Result<()> {
    debug!(path = %path.display(), errors = summary.errors.len(), "writing run summary");
    let mut buf = serde_json::to_string_pretty(summary).context("serialize run summary")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("summary path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp summary {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace summary {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_make_the_summary_unsuccessful() {
        let errors = vec![Arc::new(RunError::Tool {
            unit: "Export".to_string(),
            cause: anyhow::anyhow!("disk full"),
        })];
        let summary = RunSummary::new("model.json", "Complete", RunPhase::Complete, &errors);
        assert!(!summary.succeeded);
        assert_eq!(summary.errors[0].subject, "Export");
        assert_eq!(
            summary.errors[0].message,
            "post-simulation tool Export failed: disk full"
        );
    }

    #[test]
    fn written_summary_can_be_read_back() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("out").join("summary.json");
        let summary = RunSummary::new("Simulations", "Complete", RunPhase::Complete, &[]);

        write_summary(&path, &summary).expect("write");

        assert!(!path.with_extension("json.tmp").exists());
        let loaded = load_summary(&path).expect("load");
        assert_eq!(loaded, summary);
        assert!(loaded.succeeded);
        let raw = fs::read_to_string(&path).expect("read");
        assert!(raw.contains("\"phase\": \"complete\""));
    }
}
