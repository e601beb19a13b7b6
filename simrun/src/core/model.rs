//! Model hierarchy consumed by discovery and the post-run pipelines.
//!
//! A [`ModelNode`] owns its children; parents are never stored. Code that needs
//! the enclosing scope of a node walks down from the root and keeps the chain
//! of ancestors (see [`ModelNode::lineage`]).

use std::fmt;
use std::sync::Arc;

use anyhow::Result;

use crate::core::services::{Dependency, Resolved, ServiceSet};

/// Separator used in node paths (`Simulations/Folder/Sim1`).
pub const PATH_SEPARATOR: char = '/';

/// Work the engine can run without any discovery-side interpretation.
pub trait Job: Send + Sync {
    fn run(&self) -> Result<()>;
}

/// One named run produced by a [`SimulationGenerator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationDescription {
    pub name: String,
    /// Factor assignments as `(factor, level)` pairs, in factor order.
    pub parameters: Vec<(String, String)>,
}

/// A node that expands into zero or more simulation descriptions
/// (for example a factorial experiment).
pub trait SimulationGenerator: Send + Sync {
    /// Concrete type name; duplicate detection groups generators by it.
    fn type_name(&self) -> &str;

    fn generate(&self, node: &ModelNode) -> Result<Vec<SimulationDescription>>;
}

/// Output-processing unit run after every job has completed.
pub trait PostSimulationTool: Send + Sync {
    /// Services this tool needs. Queried immediately before the tool runs.
    fn dependencies(&self) -> Vec<Dependency> {
        Vec::new()
    }

    fn run(&self, services: &Resolved) -> Result<()>;
}

/// Test-like unit run after post-processing.
pub trait ValidationTest: Send + Sync {
    fn dependencies(&self) -> Vec<Dependency> {
        Vec::new()
    }

    fn run(&self, services: &Resolved) -> Result<()>;
}

/// Capability of a node.
#[derive(Clone)]
pub enum NodeKind {
    /// Top-level collection of simulations.
    Collection,
    Folder,
    /// A single simulation with its locally declared services.
    Simulation { services: ServiceSet },
    Generator(Arc<dyn SimulationGenerator>),
    /// Directly runnable work; always queued, never filtered.
    Runnable(Arc<dyn Job>),
    Tool(Arc<dyn PostSimulationTool>),
    /// Composite tool whose children run one after another.
    SerialTools,
    /// Composite tool whose children may run concurrently.
    ParallelTools,
    Test(Arc<dyn ValidationTest>),
    /// Named scripting container hosting a generically named unit.
    ScriptHost,
    /// Explicit service registry for everything in the enclosing scope.
    Registry(ServiceSet),
    Other,
}

impl NodeKind {
    pub fn simulation() -> Self {
        Self::Simulation {
            services: ServiceSet::new(),
        }
    }

    /// Stable lowercase label, matching the `kind` field of model files.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Collection => "collection",
            Self::Folder => "folder",
            Self::Simulation { .. } => "simulation",
            Self::Generator(_) => "generator",
            Self::Runnable(_) => "runnable",
            Self::Tool(_) => "tool",
            Self::SerialTools => "serial_tools",
            Self::ParallelTools => "parallel_tools",
            Self::Test(_) => "test",
            Self::ScriptHost => "script",
            Self::Registry(_) => "registry",
            Self::Other => "other",
        }
    }
}

impl fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simulation { services } | Self::Registry(services) => f
                .debug_tuple(self.label())
                .field(&services.type_names())
                .finish(),
            Self::Generator(generator) => f
                .debug_tuple(self.label())
                .field(&generator.type_name())
                .finish(),
            _ => f.write_str(self.label()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelNode {
    pub name: String,
    pub kind: NodeKind,
    pub enabled: bool,
    pub children: Vec<ModelNode>,
}

impl ModelNode {
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            enabled: true,
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<ModelNode>) -> Self {
        self.children = children;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Concrete type name used when grouping simulation-like nodes.
    pub fn type_name(&self) -> &str {
        match &self.kind {
            NodeKind::Simulation { .. } => "Simulation",
            NodeKind::Generator(generator) => generator.type_name(),
            other => other.label(),
        }
    }

    /// True for nodes that produce simulations (plain or generated).
    pub fn is_simulation_like(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Simulation { .. } | NodeKind::Generator(_)
        )
    }

    /// True for post-processing units, leaf or composite.
    pub fn is_tool(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Tool(_) | NodeKind::SerialTools | NodeKind::ParallelTools
        )
    }

    /// Services of the first enabled registry among this node's children.
    pub fn registry(&self) -> Option<&ServiceSet> {
        self.children
            .iter()
            .filter(|child| child.enabled)
            .find_map(|child| match &child.kind {
                NodeKind::Registry(services) => Some(services),
                _ => None,
            })
    }

    /// Chain of nodes from `self` down to the node at `path`, inclusive.
    ///
    /// The first path segment must name `self`. Returns `None` when any
    /// segment does not match a child.
    pub fn lineage(&self, path: &str) -> Option<Vec<&ModelNode>> {
        let mut segments = path
            .split(PATH_SEPARATOR)
            .filter(|segment| !segment.is_empty());
        if segments.next()? != self.name {
            return None;
        }
        let mut chain = vec![self];
        let mut current = self;
        for segment in segments {
            current = current
                .children
                .iter()
                .find(|child| child.name == segment)?;
            chain.push(current);
        }
        Some(chain)
    }
}

/// Path of a child given its parent's path.
pub fn child_path(parent: &str, name: &str) -> String {
    format!("{parent}{PATH_SEPARATOR}{name}")
}
