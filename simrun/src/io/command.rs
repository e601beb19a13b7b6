//! External command as a post-simulation tool or a validation test.
//!
//! The command passes when it exits with status zero inside its timeout.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use tracing::info;

use crate::core::model::{PostSimulationTool, ValidationTest};
use crate::core::services::Resolved;
use crate::io::process::run_with_timeout;

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 100_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandCheck {
    pub argv: Vec<String>,
    pub workdir: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl CommandCheck {
    pub fn new(argv: Vec<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            argv,
            workdir: workdir.into(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn execute(&self) -> Result<()> {
        let output = run_with_timeout(
            &self.argv,
            &self.workdir,
            self.timeout,
            self.output_limit_bytes,
        )?;
        if output.timed_out {
            bail!(
                "`{}` timed out after {:?}",
                self.argv.join(" "),
                self.timeout
            );
        }
        if !output.status.success() {
            let detail = output.last_line().unwrap_or_default();
            bail!(
                "`{}` exited with status {:?}: {}",
                self.argv.join(" "),
                output.status.code(),
                detail
            );
        }
        info!(command = %self.argv.join(" "), "command passed");
        Ok(())
    }
}

impl PostSimulationTool for CommandCheck {
    fn run(&self, _services: &Resolved) -> Result<()> {
        self.execute()
    }
}

impl ValidationTest for CommandCheck {
    fn run(&self, _services: &Resolved) -> Result<()> {
        self.execute()
    }
}
