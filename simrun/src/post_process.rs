//! Post-simulation tool pipeline.
//!
//! The pipeline runs the tool nodes directly under the run root, in
//! declaration order. A composite runs its children: serial composites one
//! after another, parallel composites each on its own scoped thread. Every
//! unit resolves its dependencies right before its own run, and a failing unit
//! is recorded without affecting its siblings.

use std::thread;

use anyhow::anyhow;
use tracing::{debug, info, instrument};

use crate::core::model::{ModelNode, NodeKind};
use crate::core::phase::running_tool_status;
use crate::core::services::ServiceSet;
use crate::error::RunError;
use crate::gate::CancelToken;
use crate::run_state::RunState;
use crate::unit::resolve_and_run;

/// What a pipeline pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// Leaf tools that ran successfully, in completion order per composite.
    pub completed: Vec<String>,
    /// Leaf tools that failed.
    pub failed: Vec<String>,
    /// True when cancellation caused at least one unit to be skipped.
    pub cancelled: bool,
}

impl PipelineReport {
    fn merge(&mut self, other: PipelineReport) {
        self.completed.extend(other.completed);
        self.failed.extend(other.failed);
        self.cancelled |= other.cancelled;
    }
}

/// Tool units directly under `root`, in declaration order.
pub fn tool_units(root: &ModelNode) -> impl Iterator<Item = &ModelNode> {
    root.children.iter().filter(|child| child.is_tool())
}

/// Run every enabled tool under `root`, appending failures to the run's
/// error list in declaration order.
#[instrument(skip_all, fields(root = %root.name))]
pub fn run_post_simulation_tools(
    root: &ModelNode,
    services: &ServiceSet,
    state: &RunState,
    cancel: &CancelToken,
) -> PipelineReport {
    let pass = Pass {
        services,
        state,
        cancel,
    };
    let mut report = PipelineReport::default();
    let mut errors = Vec::new();
    for unit in tool_units(root) {
        pass.run_node(unit, &mut report, &mut errors);
    }
    state.errors().extend(errors);
    info!(
        completed = report.completed.len(),
        failed = report.failed.len(),
        cancelled = report.cancelled,
        "post-simulation tools finished"
    );
    report
}

struct Pass<'a> {
    services: &'a ServiceSet,
    state: &'a RunState,
    cancel: &'a CancelToken,
}

impl Pass<'_> {
    fn run_node(&self, node: &ModelNode, report: &mut PipelineReport, errors: &mut Vec<RunError>) {
        if !node.enabled {
            debug!(tool = %node.name, "tool disabled, skipping");
            return;
        }
        if self.cancel.is_cancelled() {
            report.cancelled = true;
            return;
        }
        match &node.kind {
            NodeKind::Tool(tool) => {
                self.state.set_status(running_tool_status(&node.name));
                let result = resolve_and_run(
                    self.services,
                    || tool.dependencies(),
                    |resolved| tool.run(resolved),
                );
                match result {
                    Ok(()) => report.completed.push(node.name.clone()),
                    Err(cause) => {
                        report.failed.push(node.name.clone());
                        errors.push(RunError::Tool {
                            unit: node.name.clone(),
                            cause,
                        });
                    }
                }
            }
            NodeKind::SerialTools => {
                for child in node.children.iter().filter(|child| child.is_tool()) {
                    self.run_node(child, report, errors);
                }
            }
            NodeKind::ParallelTools => self.run_parallel(node, report, errors),
            _ => {}
        }
    }

    fn run_parallel(
        &self,
        node: &ModelNode,
        report: &mut PipelineReport,
        errors: &mut Vec<RunError>,
    ) {
        let children: Vec<&ModelNode> = node
            .children
            .iter()
            .filter(|child| child.is_tool())
            .collect();
        debug!(composite = %node.name, children = children.len(), "running tools in parallel");
        thread::scope(|scope| {
            let handles: Vec<_> = children
                .iter()
                .map(|child| {
                    scope.spawn(move || {
                        let mut child_report = PipelineReport::default();
                        let mut child_errors = Vec::new();
                        self.run_node(child, &mut child_report, &mut child_errors);
                        (child_report, child_errors)
                    })
                })
                .collect();
            // Joined in declaration order so error order stays deterministic.
            for (child, handle) in children.iter().zip(handles) {
                match handle.join() {
                    Ok((child_report, child_errors)) => {
                        report.merge(child_report);
                        errors.extend(child_errors);
                    }
                    Err(_) => {
                        report.failed.push(child.name.clone());
                        errors.push(RunError::Tool {
                            unit: child.name.clone(),
                            cause: anyhow!("tool thread panicked"),
                        });
                    }
                }
            }
        });
    }
}
