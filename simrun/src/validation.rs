//! Validation runner: resolve and run every test under the run root.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::core::model::{ModelNode, NodeKind, ValidationTest};
use crate::core::phase::STATUS_RUNNING_TESTS;
use crate::core::services::ServiceSet;
use crate::error::RunError;
use crate::gate::CancelToken;
use crate::io::storage::StorageHandle;
use crate::run_state::RunState;
use crate::unit::resolve_and_run;

/// A test found under the run root together with the name its failures are
/// reported under.
#[derive(Clone)]
pub struct TestUnit {
    pub display_name: String,
    pub test: Arc<dyn ValidationTest>,
}

/// Outcome of a validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub passed: Vec<String>,
    pub failed: Vec<String>,
    pub cancelled: bool,
}

/// Services injected into tests of a run rooted at the last node of `lineage`.
///
/// The first match wins:
/// 1. a registry directly under the run root
/// 2. a registry under the nearest ancestor that has one
/// 3. the run root's own services when it is a simulation
/// 4. nothing
///
/// The storage handle is added when present and not already registered.
pub fn build_service_set(lineage: &[&ModelNode], storage: Option<&StorageHandle>) -> ServiceSet {
    let mut services = lineage
        .iter()
        .rev()
        .find_map(|node| node.registry())
        .cloned()
        .or_else(|| match lineage.last().map(|root| &root.kind) {
            Some(NodeKind::Simulation { services }) => Some(services.clone()),
            _ => None,
        })
        .unwrap_or_default();
    if let Some(storage) = storage
        && !services.contains::<StorageHandle>()
    {
        services.insert(storage.clone());
    }
    services
}

/// Enabled tests under `root`, depth-first in declaration order.
pub fn collect_tests(root: &ModelNode) -> Vec<TestUnit> {
    let mut units = Vec::new();
    collect_into(root, None, &mut units);
    units
}

fn collect_into(node: &ModelNode, parent: Option<&ModelNode>, units: &mut Vec<TestUnit>) {
    if !node.enabled {
        return;
    }
    if let NodeKind::Test(test) = &node.kind {
        let display_name = match parent {
            Some(parent) if matches!(parent.kind, NodeKind::ScriptHost) => parent.name.clone(),
            _ => node.name.clone(),
        };
        units.push(TestUnit {
            display_name,
            test: test.clone(),
        });
    }
    for child in &node.children {
        collect_into(child, Some(node), units);
    }
}

/// Run every test under `root`; failures are appended to the run's error list.
#[instrument(skip_all, fields(root = %root.name))]
pub fn run_tests(
    root: &ModelNode,
    services: &ServiceSet,
    state: &RunState,
    cancel: &CancelToken,
) -> ValidationReport {
    state.set_status(STATUS_RUNNING_TESTS);
    let mut report = ValidationReport::default();
    for unit in collect_tests(root) {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }
        debug!(test = %unit.display_name, "running test");
        let test = &unit.test;
        match resolve_and_run(services, || test.dependencies(), |resolved| test.run(resolved)) {
            Ok(()) => report.passed.push(unit.display_name),
            Err(cause) => {
                report.failed.push(unit.display_name.clone());
                state.errors().push(RunError::Test {
                    unit: unit.display_name,
                    cause,
                });
            }
        }
    }
    info!(
        passed = report.passed.len(),
        failed = report.failed.len(),
        cancelled = report.cancelled,
        "tests finished"
    );
    report
}
