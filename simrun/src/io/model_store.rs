//! Model file loading: JSON, validated against the v1 model schema.
//!
//! Node kinds that carry behaviour (`runnable`, `tool`, `test`) are bound to
//! implementations by plugin name through a [`PluginRegistry`]; `tool` and
//! `test` nodes may instead give a `command` to run. A node that cannot be
//! bound is kept as an inert `other` node and reported in
//! [`LoadedModel::errors`], so one bad node does not hide the rest of the model.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use jsonschema::validator_for;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::factorial::{Factor, Factorial};
use crate::core::model::{
    Job, ModelNode, NodeKind, PostSimulationTool, ValidationTest, child_path,
};
use crate::core::services::ServiceSet;
use crate::error::DiscoveryError;
use crate::io::command::CommandCheck;

const MODEL_SCHEMA: &str = include_str!("../../schemas/model.schema.json");

/// Free-form parameters declared on a simulation or registry node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelParameters(pub BTreeMap<String, Value>);

/// Result of loading a model file.
#[derive(Debug)]
pub struct LoadedModel {
    pub root: ModelNode,
    /// Problems with individual nodes; the rest of the tree is still usable.
    pub errors: Vec<String>,
}

/// Loads a model tree from a file.
pub trait ModelLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<LoadedModel, DiscoveryError>;
}

/// Named implementations that model files refer to by `plugin`.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    jobs: HashMap<String, Arc<dyn Job>>,
    tools: HashMap<String, Arc<dyn PostSimulationTool>>,
    tests: HashMap<String, Arc<dyn ValidationTest>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_job(mut self, name: impl Into<String>, job: Arc<dyn Job>) -> Self {
        self.jobs.insert(name.into(), job);
        self
    }

    pub fn with_tool(mut self, name: impl Into<String>, tool: Arc<dyn PostSimulationTool>) -> Self {
        self.tools.insert(name.into(), tool);
        self
    }

    pub fn with_test(mut self, name: impl Into<String>, test: Arc<dyn ValidationTest>) -> Self {
        self.tests.insert(name.into(), test);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum KindDoc {
    Collection,
    Folder,
    Simulation,
    Experiment,
    Runnable,
    Tool,
    SerialTools,
    ParallelTools,
    Test,
    Script,
    Registry,
    Other,
}

#[derive(Debug, Deserialize)]
struct NodeDoc {
    name: String,
    kind: KindDoc,
    #[serde(default = "enabled_by_default")]
    enabled: bool,
    #[serde(default)]
    children: Vec<NodeDoc>,
    #[serde(default)]
    factors: Vec<Factor>,
    plugin: Option<String>,
    command: Option<Vec<String>>,
    timeout_secs: Option<u64>,
    #[serde(default)]
    parameters: BTreeMap<String, Value>,
}

fn enabled_by_default() -> bool {
    true
}

/// Loader for JSON model files.
#[derive(Clone, Default)]
pub struct JsonModelLoader {
    plugins: PluginRegistry,
}

impl JsonModelLoader {
    pub fn new(plugins: PluginRegistry) -> Self {
        Self { plugins }
    }

    /// Parse a model document. `base_dir` is the working directory for
    /// `command` checks.
    pub fn parse(&self, contents: &str, base_dir: &Path) -> Result<LoadedModel, DiscoveryError> {
        let value: Value = serde_json::from_str(contents)
            .map_err(|err| DiscoveryError::Malformed(format!("parse model json: {err}")))?;
        validate_schema(&value)?;
        let doc: NodeDoc = serde_json::from_value(value)
            .map_err(|err| DiscoveryError::Malformed(format!("deserialize model: {err}")))?;

        let mut errors = Vec::new();
        let root = self.build(doc, "", base_dir, &mut errors);
        Ok(LoadedModel { root, errors })
    }

    fn build(
        &self,
        doc: NodeDoc,
        parent_path: &str,
        base_dir: &Path,
        errors: &mut Vec<String>,
    ) -> ModelNode {
        let path = doc_path(parent_path, &doc.name);
        let kind = match self.kind_for(&doc, base_dir) {
            Ok(kind) => kind,
            Err(message) => {
                errors.push(format!("{path}: {message}"));
                NodeKind::Other
            }
        };
        let children = doc
            .children
            .into_iter()
            .map(|child| self.build(child, &path, base_dir, errors))
            .collect();
        ModelNode {
            name: doc.name,
            kind,
            enabled: doc.enabled,
            children,
        }
    }

    fn kind_for(&self, doc: &NodeDoc, base_dir: &Path) -> Result<NodeKind, String> {
        let kind = match doc.kind {
            KindDoc::Collection => NodeKind::Collection,
            KindDoc::Folder => NodeKind::Folder,
            KindDoc::Simulation => NodeKind::Simulation {
                services: parameter_services(&doc.parameters),
            },
            KindDoc::Experiment => {
                NodeKind::Generator(Arc::new(Factorial::new(doc.factors.clone())))
            }
            KindDoc::Runnable => NodeKind::Runnable(lookup(&self.plugins.jobs, doc, "job")?),
            KindDoc::Tool => match command_check(doc, base_dir) {
                Some(check) => NodeKind::Tool(Arc::new(check)),
                None => NodeKind::Tool(lookup(&self.plugins.tools, doc, "tool")?),
            },
            KindDoc::Test => match command_check(doc, base_dir) {
                Some(check) => NodeKind::Test(Arc::new(check)),
                None => NodeKind::Test(lookup(&self.plugins.tests, doc, "test")?),
            },
            KindDoc::SerialTools => NodeKind::SerialTools,
            KindDoc::ParallelTools => NodeKind::ParallelTools,
            KindDoc::Script => NodeKind::ScriptHost,
            KindDoc::Registry => {
                let mut services = ServiceSet::new();
                services.insert(ModelParameters(doc.parameters.clone()));
                NodeKind::Registry(services)
            }
            KindDoc::Other => NodeKind::Other,
        };
        Ok(kind)
    }
}

impl ModelLoader for JsonModelLoader {
    #[instrument(skip_all, fields(path = %path.display()))]
    fn load(&self, path: &Path) -> Result<LoadedModel, DiscoveryError> {
        if !path.exists() {
            return Err(DiscoveryError::MissingSource(path.to_path_buf()));
        }
        let contents = fs::read_to_string(path).map_err(|err| {
            DiscoveryError::Malformed(format!("read {}: {err}", path.display()))
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let loaded = self.parse(&contents, base_dir)?;
        debug!(
            root = %loaded.root.name,
            node_errors = loaded.errors.len(),
            "model loaded"
        );
        Ok(loaded)
    }
}

fn lookup<T: ?Sized>(
    plugins: &HashMap<String, Arc<T>>,
    doc: &NodeDoc,
    what: &str,
) -> Result<Arc<T>, String> {
    let name = doc
        .plugin
        .as_deref()
        .ok_or_else(|| format!("{what} node needs a `plugin`"))?;
    plugins
        .get(name)
        .cloned()
        .ok_or_else(|| format!("unknown {what} plugin '{name}'"))
}

fn command_check(doc: &NodeDoc, base_dir: &Path) -> Option<CommandCheck> {
    let argv = doc.command.clone()?;
    let mut check = CommandCheck::new(argv, base_dir);
    if let Some(secs) = doc.timeout_secs {
        check = check.with_timeout(Duration::from_secs(secs));
    }
    Some(check)
}

fn parameter_services(parameters: &BTreeMap<String, Value>) -> ServiceSet {
    let mut services = ServiceSet::new();
    if !parameters.is_empty() {
        services.insert(ModelParameters(parameters.clone()));
    }
    services
}

fn doc_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        return name.to_string();
    }
    child_path(parent, name)
}

fn validate_schema(model: &Value) -> Result<(), DiscoveryError> {
    let schema: Value = serde_json::from_str(MODEL_SCHEMA)
        .map_err(|err| DiscoveryError::Malformed(format!("parse model schema: {err}")))?;
    let compiled = validator_for(&schema)
        .map_err(|err| DiscoveryError::Malformed(format!("invalid model schema: {err}")))?;
    if !compiled.is_valid(model) {
        let messages = compiled
            .iter_errors(model)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(DiscoveryError::Malformed(format!(
            "model schema validation failed: {}",
            messages.join("; ")
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::discovery::find_all_simulation_names;
    use crate::core::filter::DiscoveryFilter;
    use crate::core::services::Resolved;
    use anyhow::Result;

    struct Summary;

    impl PostSimulationTool for Summary {
        fn run(&self, _services: &Resolved) -> Result<()> {
            Ok(())
        }
    }

    const MODEL: &str = r#"{
      "name": "Simulations",
      "kind": "collection",
      "children": [
        { "name": "Services", "kind": "registry", "parameters": { "site": "Dalby" } },
        { "name": "Sim1", "kind": "simulation", "parameters": { "start": "1990-01-01" } },
        { "name": "Exp", "kind": "experiment",
          "factors": [ { "name": "N", "levels": ["0", "50"] } ] },
        { "name": "Old", "kind": "simulation", "enabled": false },
        { "name": "Summary", "kind": "tool", "plugin": "summary" },
        { "name": "Check1", "kind": "script",
          "children": [ { "name": "Script", "kind": "test", "command": ["true"] } ] }
      ]
    }"#;

    #[test]
    fn parses_model_and_binds_plugins() {
        let loader =
            JsonModelLoader::new(PluginRegistry::new().with_tool("summary", Arc::new(Summary)));
        let loaded = loader.parse(MODEL, Path::new(".")).expect("parse");
        assert!(loaded.errors.is_empty(), "errors: {:?}", loaded.errors);

        let names =
            find_all_simulation_names(&loaded.root, &DiscoveryFilter::All).expect("names");
        assert_eq!(names, vec!["Sim1", "ExpN0", "ExpN50"]);

        let params = loaded.root.registry().expect("registry");
        let params = params.get::<ModelParameters>().expect("parameters");
        assert_eq!(params.0.get("site"), Some(&Value::from("Dalby")));

        let host = &loaded.root.children[5];
        assert!(matches!(host.kind, NodeKind::ScriptHost));
        assert!(matches!(host.children[0].kind, NodeKind::Test(_)));
    }

    #[test]
    fn unknown_plugin_is_reported_and_node_kept_inert() {
        let loader = JsonModelLoader::default();
        let loaded = loader.parse(MODEL, Path::new(".")).expect("parse");
        assert_eq!(
            loaded.errors,
            vec!["Simulations/Summary: unknown tool plugin 'summary'"]
        );
        assert!(matches!(loaded.root.children[4].kind, NodeKind::Other));
    }

    #[test]
    fn schema_violation_is_malformed() {
        let loader = JsonModelLoader::default();
        let err = loader
            .parse(r#"{ "name": "Simulations", "kind": "galaxy" }"#, Path::new("."))
            .expect_err("invalid kind");
        assert_eq!(err.as_label(), "malformed");
        assert!(err.to_string().contains("schema validation failed"));
    }

    #[test]
    fn missing_file_is_missing_source() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("absent.json");
        let err = JsonModelLoader::default()
            .load(&path)
            .expect_err("missing");
        assert!(matches!(err, DiscoveryError::MissingSource(p) if p == path));
    }

    #[test]
    fn load_reads_file_from_disk() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("model.json");
        fs::write(
            &path,
            r#"{ "name": "Simulations", "kind": "collection",
                 "children": [ { "name": "A", "kind": "simulation" } ] }"#,
        )
        .expect("write");
        let loaded = JsonModelLoader::default().load(&path).expect("load");
        assert_eq!(loaded.root.children.len(), 1);
    }
}
