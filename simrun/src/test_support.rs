//! Test-only builders and recording fakes.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, bail};
use tempfile::TempDir;

use crate::core::model::{ModelNode, NodeKind, PostSimulationTool, ValidationTest};
use crate::core::services::{Dependency, Resolved, ServiceSet};
use crate::error::DiscoveryError;
use crate::gate::{CancelToken, ReadinessGate};
use crate::io::model_store::{LoadedModel, ModelLoader};
use crate::io::storage::Storage;

/// Enabled simulation with no services.
pub fn sim(name: &str) -> ModelNode {
    ModelNode::new(name, NodeKind::simulation())
}

/// Simulation declaring `services` locally.
pub fn sim_with_services(name: &str, services: ServiceSet) -> ModelNode {
    ModelNode::new(name, NodeKind::Simulation { services })
}

pub fn folder(name: &str, children: Vec<ModelNode>) -> ModelNode {
    ModelNode::new(name, NodeKind::Folder).with_children(children)
}

pub fn collection(name: &str, children: Vec<ModelNode>) -> ModelNode {
    ModelNode::new(name, NodeKind::Collection).with_children(children)
}

pub fn registry(services: ServiceSet) -> ModelNode {
    ModelNode::new("Services", NodeKind::Registry(services))
}

/// Storage fake that records the order of calls made to it.
#[derive(Debug, Default)]
pub struct RecordingStorage {
    calls: Mutex<Vec<&'static str>>,
}

impl RecordingStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().expect("calls").clone()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().expect("calls").push(call);
    }
}

impl Storage for RecordingStorage {
    fn clear_write_tracking(&self) {
        self.record("clear_write_tracking");
    }

    fn wait_until_idle(&self) {
        self.record("wait_until_idle");
    }

    fn refresh_readable_view(&self) {
        self.record("refresh_readable_view");
    }

    fn stop_accepting_writes(&self) {
        self.record("stop_accepting_writes");
    }
}

/// Tool or test that counts its runs, optionally fails, and optionally
/// requires a service of type `T`.
pub struct Scripted<T = ()> {
    runs: AtomicUsize,
    fail: bool,
    require: bool,
    _needs: std::marker::PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> Scripted<T> {
    pub fn passing() -> Arc<Self> {
        Arc::new(Self::build(false, false))
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self::build(true, false))
    }

    /// Passes if a `T` is injected; resolution fails otherwise.
    pub fn requiring() -> Arc<Self> {
        Arc::new(Self::build(false, true))
    }

    fn build(fail: bool, require: bool) -> Self {
        Self {
            runs: AtomicUsize::new(0),
            fail,
            require,
            _needs: std::marker::PhantomData,
        }
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    fn declared(&self) -> Vec<Dependency> {
        if self.require {
            vec![Dependency::required::<T>()]
        } else {
            Vec::new()
        }
    }

    fn execute(&self, services: &Resolved) -> Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if self.require {
            services.require::<T>()?;
        }
        if self.fail {
            bail!("scripted failure");
        }
        Ok(())
    }
}

impl<T: Send + Sync + 'static> PostSimulationTool for Scripted<T> {
    fn dependencies(&self) -> Vec<Dependency> {
        self.declared()
    }

    fn run(&self, services: &Resolved) -> Result<()> {
        self.execute(services)
    }
}

impl<T: Send + Sync + 'static> ValidationTest for Scripted<T> {
    fn dependencies(&self) -> Vec<Dependency> {
        self.declared()
    }

    fn run(&self, services: &Resolved) -> Result<()> {
        self.execute(services)
    }
}

pub fn tool_unit<T: Send + Sync + 'static>(name: &str, tool: &Arc<Scripted<T>>) -> ModelNode {
    ModelNode::new(name, NodeKind::Tool(tool.clone()))
}

pub fn test_unit<T: Send + Sync + 'static>(name: &str, test: &Arc<Scripted<T>>) -> ModelNode {
    ModelNode::new(name, NodeKind::Test(test.clone()))
}

/// Loader that hands out a fixed tree, but only after [`GatedLoader::release`].
pub struct GatedLoader {
    root: ModelNode,
    released: ReadinessGate,
    loads: AtomicUsize,
}

impl GatedLoader {
    pub fn new(root: ModelNode) -> Arc<Self> {
        Arc::new(Self {
            root,
            released: ReadinessGate::new(0),
            loads: AtomicUsize::new(0),
        })
    }

    pub fn release(&self) {
        self.released.mark_ready();
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl ModelLoader for GatedLoader {
    fn load(&self, _path: &Path) -> Result<LoadedModel, DiscoveryError> {
        self.released
            .wait(Duration::from_secs(30), &CancelToken::new())?;
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(LoadedModel {
            root: self.root.clone(),
            errors: Vec::new(),
        })
    }
}

/// Write `contents` as `model.json` in a fresh temp directory.
pub fn model_file(contents: &str) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("model.json");
    fs::write(&path, contents).expect("write model");
    (dir, path)
}
