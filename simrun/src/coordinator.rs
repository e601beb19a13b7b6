//! Run coordinator: discovery, phase sequencing, and the engine hooks.
//!
//! Construction starts discovery (synchronously for an in-memory tree, on a
//! background thread for a model file) and returns. Everything that needs the
//! discovery result goes through the readiness gate first:
//!
//! ```text
//! Discovering -> AwaitingExecution -> Executing -> PostProcessing -> Validating -> Complete
//! ```
//!
//! The coordinator never stops early. Discovery, tool and test failures are
//! appended to the error list and the run carries on to `Complete`.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::discovery::{RunnableUnit, check_unique_names, discover};
use crate::core::model::ModelNode;
use crate::core::phase::{
    RunPhase, STATUS_COMPLETE, STATUS_FINDING, STATUS_RUNNING_SIMULATIONS,
    STATUS_WAITING_FOR_STORAGE,
};
use crate::error::{DiscoveryError, RunError};
use crate::gate::{CancelToken, ReadinessGate};
use crate::io::config::RunOptions;
use crate::io::engine::{ExecutionEngine, RunHooks};
use crate::io::model_store::ModelLoader;
use crate::io::storage::{StorageHandle, StorageSyncPoint};
use crate::io::summary::RunSummary;
use crate::post_process::run_post_simulation_tools;
use crate::run_state::RunState;
use crate::validation::{build_service_set, run_tests};

/// Notified once per run, after discovery succeeds and before any unit is
/// queued.
pub trait RunListener: Send + Sync {
    fn begin_run(&self);
}

/// External collaborators of a run.
#[derive(Clone)]
pub struct Collaborators {
    engine: Arc<dyn ExecutionEngine>,
    storage: Option<StorageHandle>,
    listeners: Vec<Arc<dyn RunListener>>,
}

impl Collaborators {
    pub fn new(engine: Arc<dyn ExecutionEngine>) -> Self {
        Self {
            engine,
            storage: None,
            listeners: Vec::new(),
        }
    }

    pub fn with_storage(mut self, storage: StorageHandle) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn RunListener>) -> Self {
        self.listeners.push(listener);
        self
    }
}

struct Shared {
    source_id: String,
    options: RunOptions,
    engine: Arc<dyn ExecutionEngine>,
    listeners: Vec<Arc<dyn RunListener>>,
    sync: StorageSyncPoint,
    gate: ReadinessGate,
    state: RunState,
    cancel: CancelToken,
    cancel_recorded: AtomicBool,
    discovery: Mutex<Discovery>,
    model: OnceLock<ModelNode>,
}

/// Who settled the job queue: the discovery pass, or a hook that stopped
/// waiting for it. Whichever comes first queues; the other only opens the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Discovery {
    Pending,
    Queued,
    Abandoned,
}

pub struct RunCoordinator {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RunCoordinator {
    /// Coordinate a run over an in-memory tree. Discovery has finished when
    /// this returns.
    pub fn new(root: ModelNode, options: RunOptions, collaborators: Collaborators) -> Result<Self> {
        let source_id = root.name.clone();
        let coordinator = Self::build(source_id, options, collaborators)?;
        coordinator.shared.discover_and_open(root);
        Ok(coordinator)
    }

    /// Coordinate a run over a model file. Loading and discovery happen on a
    /// background thread; this returns as soon as that thread is started.
    pub fn from_file(
        path: impl Into<PathBuf>,
        loader: Arc<dyn ModelLoader>,
        options: RunOptions,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let path = path.into();
        let coordinator = Self::build(path.display().to_string(), options, collaborators)?;
        let shared = Arc::clone(&coordinator.shared);
        let handle = thread::Builder::new()
            .name("simrun-discovery".to_string())
            .spawn(move || shared.load_and_discover(&path, loader.as_ref()))
            .context("spawn discovery thread")?;
        *coordinator
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(coordinator)
    }

    fn build(source_id: String, options: RunOptions, collaborators: Collaborators) -> Result<Self> {
        options.validate().context("invalid run options")?;
        let gate = ReadinessGate::new(options.spin_limit);
        Ok(Self {
            shared: Arc::new(Shared {
                source_id,
                options,
                engine: collaborators.engine,
                listeners: collaborators.listeners,
                sync: StorageSyncPoint::new(collaborators.storage),
                gate,
                state: RunState::new(),
                cancel: CancelToken::new(),
                cancel_recorded: AtomicBool::new(false),
                discovery: Mutex::new(Discovery::Pending),
                model: OnceLock::new(),
            }),
            worker: Mutex::new(None),
        })
    }

    pub fn options(&self) -> &RunOptions {
        &self.shared.options
    }

    /// Model file path, or the root name for in-memory trees.
    pub fn source_id(&self) -> &str {
        &self.shared.source_id
    }

    pub fn status(&self) -> String {
        self.shared.state.status()
    }

    pub fn phase(&self) -> RunPhase {
        self.shared.state.phase()
    }

    /// Errors recorded so far, in recording order.
    pub fn errors(&self) -> Vec<Arc<RunError>> {
        self.shared.state.errors().snapshot()
    }

    /// True when the run reached `Complete` without recording any error.
    pub fn succeeded(&self) -> bool {
        self.phase() == RunPhase::Complete && self.shared.state.errors().is_empty()
    }

    pub fn is_ready(&self) -> bool {
        self.shared.gate.is_ready()
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary::new(
            self.source_id(),
            self.status(),
            self.phase(),
            &self.errors(),
        )
    }

    /// Stop waiting for discovery and skip the remaining units of the current
    /// phase. The final storage flush still happens.
    pub fn cancel(&self) {
        info!(source = %self.shared.source_id, "run cancelled");
        self.shared.cancel.cancel();
        self.shared.gate.interrupt();
    }

    /// Wait for the background discovery thread, if there is one.
    pub fn join(&self) -> Result<()> {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match handle {
            Some(handle) => handle
                .join()
                .map_err(|_| anyhow!("discovery thread for {} panicked", self.source_id())),
            None => Ok(()),
        }
    }
}

impl RunHooks for RunCoordinator {
    #[instrument(skip_all, fields(source = %self.shared.source_id))]
    fn before_any_job_runs(&self) {
        let shared = &self.shared;
        shared.await_discovery();
        shared.sync.begin_run();
        shared.state.set_status(STATUS_RUNNING_SIMULATIONS);
        shared.state.advance(RunPhase::Executing);
    }

    #[instrument(skip_all, fields(source = %self.shared.source_id))]
    fn after_all_jobs_complete(&self) {
        let shared = &self.shared;
        shared.await_discovery();
        shared.state.set_status(STATUS_WAITING_FOR_STORAGE);
        shared.sync.flush();

        if let Some((lineage, run_root)) = shared.run_scope() {
            let services = build_service_set(&lineage, shared.sync.handle());
            if shared.options.run_post_simulation_tools {
                shared.state.advance(RunPhase::PostProcessing);
                let report =
                    run_post_simulation_tools(run_root, &services, &shared.state, &shared.cancel);
                if report.cancelled {
                    shared.record_cancelled(RunPhase::PostProcessing);
                }
            }
            if shared.options.run_tests {
                shared.state.advance(RunPhase::Validating);
                let report = run_tests(run_root, &services, &shared.state, &shared.cancel);
                if report.cancelled {
                    shared.record_cancelled(RunPhase::Validating);
                }
            }
        }
        if shared.cancel.is_cancelled() {
            shared.record_cancelled(shared.state.phase());
        }

        shared.sync.flush();
        shared.state.set_status(STATUS_COMPLETE);
        shared.state.advance(RunPhase::Complete);
        info!(errors = shared.state.errors().len(), "run complete");
    }
}

impl Shared {
    fn load_and_discover(&self, path: &Path, loader: &dyn ModelLoader) {
        let outcome = catch_unwind(AssertUnwindSafe(|| loader.load(path)));
        self.settle(|| match outcome {
            Ok(Ok(loaded)) => {
                for message in loaded.errors {
                    self.record_discovery(DiscoveryError::Malformed(message));
                }
                self.install_and_queue(loaded.root)
            }
            Ok(Err(error)) => {
                self.record_discovery(error);
                0
            }
            Err(_) => {
                self.record_discovery(DiscoveryError::Malformed(
                    "model loader panicked".to_string(),
                ));
                0
            }
        });
    }

    #[instrument(skip_all, fields(source = %self.source_id))]
    fn discover_and_open(&self, root: ModelNode) {
        self.settle(|| self.install_and_queue(root));
    }

    /// Run `queue` and open the gate, unless a hook already abandoned
    /// discovery. The gate opens in every case.
    fn settle(&self, queue: impl FnOnce() -> usize) {
        let mut discovery = self.discovery_state();
        if *discovery == Discovery::Abandoned {
            debug!("discovery finished after the run stopped waiting; nothing queued");
            self.gate.mark_ready();
            return;
        }
        let queued = queue();
        *discovery = Discovery::Queued;
        self.open(queued);
    }

    /// Install `root` and queue its units. Returns how many were queued.
    fn install_and_queue(&self, root: ModelNode) -> usize {
        if self.cancel.is_cancelled() {
            debug!("run cancelled before discovery started; skipping discovery");
            return 0;
        }
        self.state.set_status(STATUS_FINDING);
        if self.model.set(root).is_err() {
            warn!("model already installed; keeping the first one");
        }
        match catch_unwind(AssertUnwindSafe(|| self.queue_units())) {
            Ok(Ok(queued)) => queued,
            Ok(Err(error)) => {
                self.record_discovery(error);
                0
            }
            Err(_) => {
                self.record_discovery(DiscoveryError::Malformed(
                    "discovery panicked".to_string(),
                ));
                0
            }
        }
    }

    fn queue_units(&self) -> Result<usize, DiscoveryError> {
        let (_, run_root) = self.run_scope().ok_or_else(|| {
            DiscoveryError::Malformed(format!(
                "scope {} does not name a node",
                self.options.scope.as_deref().unwrap_or_default()
            ))
        })?;
        check_unique_names(run_root)?;
        let filter = self.options.filter()?;

        for listener in &self.listeners {
            listener.begin_run();
        }

        if !self.options.run_simulations {
            debug!("simulations disabled; nothing queued");
            return Ok(0);
        }
        let mut queued = 0usize;
        for item in discover(run_root, &filter) {
            match item {
                Ok(unit) => {
                    debug!(unit = %unit.name, "queueing unit");
                    self.engine.add_job(unit);
                    queued += 1;
                }
                Err(error) => self.record_discovery(error),
            }
        }
        Ok(queued)
    }

    /// Guarantee the engine has work, then release every waiter.
    fn open(&self, queued: usize) {
        if queued == 0 {
            debug!("no units discovered; queueing no-op");
            self.engine.add_job(RunnableUnit::no_op());
        }
        info!(queued, errors = self.state.errors().len(), "discovery finished");
        self.state.advance(RunPhase::AwaitingExecution);
        self.gate.mark_ready();
    }

    /// Block until discovery has queued its units. The first hook that gives
    /// up records why and queues the no-op unit in place of discovery.
    fn await_discovery(&self) {
        if let Ok(discovery) = self.discovery.try_lock()
            && *discovery == Discovery::Abandoned
        {
            return;
        }
        let Err(error) = self
            .gate
            .wait(self.options.discovery_timeout(), &self.cancel)
        else {
            return;
        };
        let mut discovery = self.discovery_state();
        if *discovery != Discovery::Pending {
            return;
        }
        *discovery = Discovery::Abandoned;
        match error {
            DiscoveryError::Cancelled => self.record_cancelled(self.state.phase()),
            error => self.record_discovery(error),
        }
        debug!("discovery abandoned; queueing no-op");
        self.engine.add_job(RunnableUnit::no_op());
    }

    fn discovery_state(&self) -> MutexGuard<'_, Discovery> {
        self.discovery
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Run root and its ancestors (outermost first), plus the run root itself.
    fn run_scope(&self) -> Option<(Vec<&ModelNode>, &ModelNode)> {
        let model = self.model.get()?;
        let lineage = match &self.options.scope {
            Some(scope) => model.lineage(scope)?,
            None => vec![model],
        };
        let run_root = *lineage.last()?;
        Some((lineage, run_root))
    }

    fn record_discovery(&self, error: DiscoveryError) {
        debug!(kind = error.as_label(), "discovery error");
        self.state.errors().push(RunError::Discovery {
            source_id: self.source_id.clone(),
            error,
        });
    }

    fn record_cancelled(&self, phase: RunPhase) {
        if !self.cancel_recorded.swap(true, Ordering::SeqCst) {
            self.state.errors().push(RunError::Cancelled { phase });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::discovery::UnitPayload;
    use crate::core::model::NodeKind;
    use crate::io::engine::SerialEngine;
    use crate::io::model_store::{JsonModelLoader, PluginRegistry};
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingListener(AtomicUsize);

    impl RunListener for CountingListener {
        fn begin_run(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn tree() -> ModelNode {
        ModelNode::new("Simulations", NodeKind::Collection).with_children(vec![
            ModelNode::new("Sim1", NodeKind::simulation()),
            ModelNode::new("Folder", NodeKind::Folder)
                .with_children(vec![ModelNode::new("Sim2", NodeKind::simulation())]),
        ])
    }

    fn coordinator(root: ModelNode, options: RunOptions) -> (RunCoordinator, Arc<SerialEngine>) {
        let engine = Arc::new(SerialEngine::new());
        let coordinator =
            RunCoordinator::new(root, options, Collaborators::new(engine.clone())).expect("new");
        (coordinator, engine)
    }

    #[test]
    fn in_memory_discovery_is_ready_on_return() {
        let (coordinator, engine) = coordinator(tree(), RunOptions::default());
        assert!(coordinator.is_ready());
        assert_eq!(coordinator.phase(), RunPhase::AwaitingExecution);
        assert_eq!(engine.queued_names(), vec!["Sim1", "Sim2"]);
        assert!(coordinator.errors().is_empty());
    }

    #[test]
    fn duplicates_queue_only_the_no_op() {
        let root = ModelNode::new("Simulations", NodeKind::Collection).with_children(vec![
            ModelNode::new("Sim1", NodeKind::simulation()),
            ModelNode::new("Sim1", NodeKind::simulation()),
        ]);
        let (coordinator, engine) = coordinator(root, RunOptions::default());

        assert_eq!(engine.queued_names(), vec!["NoOp"]);
        let errors = coordinator.errors();
        assert_eq!(errors.len(), 1);
        let discovery = errors[0].as_discovery().expect("discovery error");
        assert_eq!(discovery.duplicate_names(), vec!["Sim1"]);
        assert_eq!(errors[0].subject(), "Simulations");
    }

    #[test]
    fn disabled_simulations_still_notify_listeners_and_queue_no_op() {
        let listener = Arc::new(CountingListener::default());
        let engine = Arc::new(SerialEngine::new());
        let options = RunOptions {
            run_simulations: false,
            ..RunOptions::default()
        };
        let collaborators = Collaborators::new(engine.clone()).with_listener(listener.clone());
        let coordinator = RunCoordinator::new(tree(), options, collaborators).expect("new");

        assert_eq!(listener.0.load(Ordering::SeqCst), 1);
        assert_eq!(engine.queued_names(), vec!["NoOp"]);
        assert!(coordinator.errors().is_empty());
    }

    #[test]
    fn scope_restricts_discovery_to_sub_node() {
        let options = RunOptions {
            scope: Some("Simulations/Folder".to_string()),
            ..RunOptions::default()
        };
        let (_, engine) = coordinator(tree(), options);
        assert_eq!(engine.queued_names(), vec!["Sim2"]);
    }

    #[test]
    fn unknown_scope_is_recorded() {
        let options = RunOptions {
            scope: Some("Simulations/Nowhere".to_string()),
            ..RunOptions::default()
        };
        let (coordinator, engine) = coordinator(tree(), options);
        assert_eq!(engine.queued_names(), vec!["NoOp"]);
        assert!(
            coordinator.errors()[0]
                .to_string()
                .contains("scope Simulations/Nowhere")
        );
    }

    #[test]
    fn invalid_pattern_is_a_discovery_error() {
        let options = RunOptions {
            simulation_name_pattern: Some("(".to_string()),
            ..RunOptions::default()
        };
        let (coordinator, engine) = coordinator(tree(), options);
        assert_eq!(engine.queued_names(), vec!["NoOp"]);
        assert_eq!(
            coordinator.errors()[0]
                .as_discovery()
                .map(DiscoveryError::as_label),
            Some("invalid_pattern")
        );
    }

    #[test]
    fn full_lifecycle_reaches_complete() {
        let (coordinator, engine) = coordinator(tree(), RunOptions::default());
        let failures = engine.run(&coordinator, |unit| {
            assert!(matches!(unit.payload, UnitPayload::Simulation { .. }));
            Ok(())
        });
        assert!(failures.is_empty());
        assert_eq!(coordinator.phase(), RunPhase::Complete);
        assert_eq!(coordinator.status(), STATUS_COMPLETE);
        assert!(coordinator.succeeded());
    }

    #[test]
    fn cancellation_is_recorded_once_and_run_completes() {
        let (coordinator, engine) = coordinator(tree(), RunOptions::default());
        coordinator.cancel();
        engine.run(&coordinator, |_| Ok(()));

        let cancelled: Vec<_> = coordinator
            .errors()
            .into_iter()
            .filter(|error| matches!(error.as_ref(), RunError::Cancelled { .. }))
            .collect();
        assert_eq!(cancelled.len(), 1);
        assert_eq!(coordinator.phase(), RunPhase::Complete);
    }

    #[test]
    fn cancellation_before_discovery_queues_only_the_no_op() {
        let engine = Arc::new(SerialEngine::new());
        let coordinator = RunCoordinator::build(
            "Simulations".to_string(),
            RunOptions::default(),
            Collaborators::new(engine.clone()),
        )
        .expect("build");
        coordinator.cancel();
        coordinator.shared.discover_and_open(tree());

        assert_eq!(engine.queued_names(), vec!["NoOp"]);
        assert_eq!(coordinator.phase(), RunPhase::AwaitingExecution);
        assert!(coordinator.is_ready());
        assert!(coordinator.errors().is_empty());
    }

    #[test]
    fn cancelled_load_failure_follows_the_same_rule() {
        let temp = tempfile::tempdir().expect("tempdir");
        let engine = Arc::new(SerialEngine::new());
        let coordinator = RunCoordinator::build(
            "missing.json".to_string(),
            RunOptions::default(),
            Collaborators::new(engine.clone()),
        )
        .expect("build");
        coordinator.cancel();
        let loader = JsonModelLoader::new(PluginRegistry::new());
        coordinator
            .shared
            .load_and_discover(&temp.path().join("missing.json"), &loader);

        assert_eq!(engine.queued_names(), vec!["NoOp"]);
        assert_eq!(coordinator.phase(), RunPhase::AwaitingExecution);
        assert!(coordinator.is_ready());
    }

    #[test]
    fn hooks_record_a_discovery_timeout_once() {
        let engine = Arc::new(SerialEngine::new());
        let options = RunOptions {
            discovery_timeout_ms: 20,
            spin_limit: 0,
            ..RunOptions::default()
        };
        let coordinator = RunCoordinator::build(
            "Simulations".to_string(),
            options,
            Collaborators::new(engine.clone()),
        )
        .expect("build");

        coordinator.before_any_job_runs();
        assert_eq!(engine.queued_names(), vec!["NoOp"]);
        coordinator.after_all_jobs_complete();

        let errors = coordinator.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].as_discovery().map(DiscoveryError::as_label),
            Some("timeout")
        );

        coordinator.shared.discover_and_open(tree());
        assert_eq!(engine.queued_names(), vec!["NoOp"]);
        assert!(coordinator.is_ready());
    }

    #[test]
    fn zero_timeout_options_are_rejected() {
        let options = RunOptions {
            discovery_timeout_ms: 0,
            ..RunOptions::default()
        };
        let result = RunCoordinator::new(
            tree(),
            options,
            Collaborators::new(Arc::new(SerialEngine::new())),
        );
        assert!(result.is_err());
    }
}
