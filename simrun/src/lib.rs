//! Simulation-run orchestrator.
//!
//! The crate decides which units of a hierarchical model run, gates every
//! phase on discovery, and drives the lifecycle around an external execution
//! engine. It is split into:
//!
//! - **[`core`]**: Pure logic over the model tree (discovery, filters,
//!   duplicate detection, service resolution). No I/O.
//! - **[`io`]**: Collaborators and side effects (model files, storage,
//!   execution engines, external commands, options, run summaries).
//!
//! [`coordinator`] ties the two together; [`post_process`] and [`validation`]
//! are the two failure-isolated pipelines run after all jobs complete.

pub mod coordinator;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod gate;
pub mod io;
pub mod logging;
pub mod post_process;
pub mod run_state;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
mod unit;
pub mod validation;
