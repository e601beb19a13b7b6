//! Discovery of runnable units in a model hierarchy.
//!
//! [`discover`] is a pure, lazy traversal: it never mutates the tree and can be
//! called any number of times with identical results. Nodes are handled by
//! capability, in priority order:
//!
//! 1. simulation: yielded if its name passes the filter
//! 2. generator: expanded, each description yielded if it passes the filter
//! 3. collection / folder: children visited in declaration order
//! 4. runnable: yielded unconditionally
//!
//! Disabled nodes are skipped together with their subtree.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use crate::core::filter::DiscoveryFilter;
use crate::core::model::{Job, ModelNode, NodeKind, SimulationDescription, child_path};
use crate::error::{DiscoveryError, Duplicate};

/// Name of the sentinel unit queued when discovery yields nothing.
pub const NO_OP_NAME: &str = "NoOp";

/// What the engine should execute for a unit.
#[derive(Clone)]
pub enum UnitPayload {
    Simulation {
        path: String,
    },
    Generated {
        path: String,
        description: SimulationDescription,
    },
    Direct(Arc<dyn Job>),
    NoOp,
}

impl fmt::Debug for UnitPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitPayload::Simulation { path } => {
                f.debug_struct("Simulation").field("path", path).finish()
            }
            UnitPayload::Generated { path, description } => f
                .debug_struct("Generated")
                .field("path", path)
                .field("parameters", &description.parameters)
                .finish(),
            UnitPayload::Direct(_) => f.write_str("Direct"),
            UnitPayload::NoOp => f.write_str("NoOp"),
        }
    }
}

/// A unit of work handed to the execution engine.
#[derive(Debug, Clone)]
pub struct RunnableUnit {
    pub name: String,
    pub payload: UnitPayload,
}

impl RunnableUnit {
    pub fn no_op() -> Self {
        Self {
            name: NO_OP_NAME.to_string(),
            payload: UnitPayload::NoOp,
        }
    }

    pub fn is_no_op(&self) -> bool {
        matches!(self.payload, UnitPayload::NoOp)
    }
}

/// Lazy depth-first traversal returned by [`discover`].
pub struct Discovery<'a> {
    filter: &'a DiscoveryFilter,
    stack: Vec<(&'a ModelNode, String)>,
    pending: VecDeque<Result<RunnableUnit, DiscoveryError>>,
}

/// Units under `root` accepted by `filter`, in declaration order.
///
/// A failing generator yields one error item; traversal continues after it.
pub fn discover<'a>(root: &'a ModelNode, filter: &'a DiscoveryFilter) -> Discovery<'a> {
    Discovery {
        filter,
        stack: vec![(root, root.name.clone())],
        pending: VecDeque::new(),
    }
}

impl Discovery<'_> {
    fn visit(&mut self, node: &ModelNode, path: String) {
        match &node.kind {
            NodeKind::Simulation { .. } => {
                if self.filter.matches(&node.name) {
                    self.pending.push_back(Ok(RunnableUnit {
                        name: node.name.clone(),
                        payload: UnitPayload::Simulation { path },
                    }));
                }
            }
            NodeKind::Generator(generator) => match generator.generate(node) {
                Ok(descriptions) => {
                    for description in descriptions {
                        if self.filter.matches(&description.name) {
                            self.pending.push_back(Ok(RunnableUnit {
                                name: description.name.clone(),
                                payload: UnitPayload::Generated {
                                    path: path.clone(),
                                    description,
                                },
                            }));
                        }
                    }
                }
                Err(cause) => self
                    .pending
                    .push_back(Err(DiscoveryError::Generator { path, cause })),
            },
            NodeKind::Runnable(job) => self.pending.push_back(Ok(RunnableUnit {
                name: node.name.clone(),
                payload: UnitPayload::Direct(job.clone()),
            })),
            _ => {}
        }
    }
}

impl<'a> Iterator for Discovery<'a> {
    type Item = Result<RunnableUnit, DiscoveryError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Some(item);
            }
            let (node, path) = self.stack.pop()?;
            if !node.enabled {
                continue;
            }
            if matches!(node.kind, NodeKind::Collection | NodeKind::Folder) {
                // Reverse so the first child is popped first.
                for child in node.children.iter().rev() {
                    self.stack.push((child, child_path(&path, &child.name)));
                }
                continue;
            }
            self.visit(node, path);
        }
    }
}

/// Names of every unit a run over `root` with `filter` would execute.
///
/// Usable without running anything, e.g. to preview a run.
pub fn find_all_simulation_names(
    root: &ModelNode,
    filter: &DiscoveryFilter,
) -> Result<Vec<String>, DiscoveryError> {
    discover(root, filter)
        .map(|unit| unit.map(|unit| unit.name))
        .collect()
}

/// Simulation-like names occurring more than once under the same node type.
///
/// Generators are counted but not descended into: whatever they contain is
/// expanded by the generator itself. Output is sorted by type, then name.
pub fn find_duplicates(root: &ModelNode) -> Vec<Duplicate> {
    let mut counts: BTreeMap<(String, String), usize> = BTreeMap::new();
    count_simulation_names(root, &mut counts);
    counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|((type_name, name), count)| Duplicate {
            type_name,
            name,
            count,
        })
        .collect()
}

fn count_simulation_names(node: &ModelNode, counts: &mut BTreeMap<(String, String), usize>) {
    if !node.enabled {
        return;
    }
    if node.is_simulation_like() {
        *counts
            .entry((node.type_name().to_string(), node.name.clone()))
            .or_default() += 1;
    }
    if matches!(node.kind, NodeKind::Generator(_)) {
        return;
    }
    for child in &node.children {
        count_simulation_names(child, counts);
    }
}

/// Fail with [`DiscoveryError::DuplicateNames`] if any duplicates exist.
pub fn check_unique_names(root: &ModelNode) -> Result<(), DiscoveryError> {
    let duplicates = find_duplicates(root);
    if duplicates.is_empty() {
        return Ok(());
    }
    Err(DiscoveryError::DuplicateNames(duplicates))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::SimulationGenerator;
    use anyhow::{Result, bail};

    fn sim(name: &str) -> ModelNode {
        ModelNode::new(name, NodeKind::simulation())
    }

    fn collection(children: Vec<ModelNode>) -> ModelNode {
        ModelNode::new("Simulations", NodeKind::Collection).with_children(children)
    }

    fn names(root: &ModelNode, filter: &DiscoveryFilter) -> Vec<String> {
        find_all_simulation_names(root, filter).expect("names")
    }

    struct Fixed(Vec<&'static str>);

    impl SimulationGenerator for Fixed {
        fn type_name(&self) -> &str {
            "Fixed"
        }

        fn generate(&self, _node: &ModelNode) -> Result<Vec<SimulationDescription>> {
            Ok(self
                .0
                .iter()
                .map(|name| SimulationDescription {
                    name: name.to_string(),
                    parameters: Vec::new(),
                })
                .collect())
        }
    }

    struct Broken;

    impl SimulationGenerator for Broken {
        fn type_name(&self) -> &str {
            "Broken"
        }

        fn generate(&self, _node: &ModelNode) -> Result<Vec<SimulationDescription>> {
            bail!("factor table is empty")
        }
    }

    struct Noop;

    impl Job for Noop {
        fn run(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn name_list_selects_only_listed_simulations() {
        let root = collection(vec![sim("A"), sim("B")]);
        let filter = DiscoveryFilter::names(["B"]);
        assert_eq!(names(&root, &filter), vec!["B"]);
    }

    #[test]
    fn pattern_selects_matching_simulations() {
        let root = collection(vec![sim("Sim1"), sim("Sim2"), sim("Other")]);
        let filter = DiscoveryFilter::pattern("^Sim.*").expect("pattern");
        assert_eq!(names(&root, &filter), vec!["Sim1", "Sim2"]);
    }

    #[test]
    fn folders_are_visited_in_declaration_order() {
        let root = collection(vec![
            sim("First"),
            ModelNode::new("Folder", NodeKind::Folder).with_children(vec![
                sim("Nested1"),
                ModelNode::new("Inner", NodeKind::Folder).with_children(vec![sim("Deep")]),
                sim("Nested2"),
            ]),
            sim("Last"),
        ]);
        assert_eq!(
            names(&root, &DiscoveryFilter::All),
            vec!["First", "Nested1", "Deep", "Nested2", "Last"]
        );
    }

    #[test]
    fn discovery_is_restartable() {
        let root = collection(vec![
            sim("A"),
            ModelNode::new("Exp", NodeKind::Generator(Arc::new(Fixed(vec!["E1", "E2"])))),
            sim("B"),
        ]);
        let filter = DiscoveryFilter::All;
        let first: Vec<String> = discover(&root, &filter)
            .map(|unit| unit.expect("unit").name)
            .collect();
        let second: Vec<String> = discover(&root, &filter)
            .map(|unit| unit.expect("unit").name)
            .collect();
        assert_eq!(first, vec!["A", "E1", "E2", "B"]);
        assert_eq!(first, second);
    }

    #[test]
    fn generated_descriptions_are_filtered() {
        let root = collection(vec![ModelNode::new(
            "Exp",
            NodeKind::Generator(Arc::new(Fixed(vec!["ExpN0", "ExpN50"]))),
        )]);
        let filter = DiscoveryFilter::names(["ExpN50"]);
        let units: Vec<RunnableUnit> = discover(&root, &filter)
            .collect::<Result<_, _>>()
            .expect("units");
        assert_eq!(units.len(), 1);
        match &units[0].payload {
            UnitPayload::Generated { path, description } => {
                assert_eq!(path, "Simulations/Exp");
                assert_eq!(description.name, "ExpN50");
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn direct_runnables_bypass_the_filter() {
        let root = collection(vec![
            sim("A"),
            ModelNode::new("Export", NodeKind::Runnable(Arc::new(Noop))),
        ]);
        let filter = DiscoveryFilter::names(["Nothing"]);
        assert_eq!(names(&root, &filter), vec!["Export"]);
    }

    #[test]
    fn disabled_subtrees_are_skipped() {
        let root = collection(vec![
            sim("A").disabled(),
            ModelNode::new("Folder", NodeKind::Folder)
                .with_children(vec![sim("B")])
                .disabled(),
            sim("C"),
        ]);
        assert_eq!(names(&root, &DiscoveryFilter::All), vec!["C"]);
    }

    #[test]
    fn other_nodes_yield_nothing() {
        let root = collection(vec![
            ModelNode::new("Data", NodeKind::Other).with_children(vec![sim("Hidden")]),
            sim("Visible"),
        ]);
        assert_eq!(names(&root, &DiscoveryFilter::All), vec!["Visible"]);
    }

    #[test]
    fn simulation_root_is_discovered_directly() {
        let root = sim("Solo");
        let units: Vec<RunnableUnit> = discover(&root, &DiscoveryFilter::All)
            .collect::<Result<_, _>>()
            .expect("units");
        assert_eq!(units.len(), 1);
        assert!(matches!(
            &units[0].payload,
            UnitPayload::Simulation { path } if path == "Solo"
        ));
    }

    #[test]
    fn generator_failure_is_yielded_and_traversal_continues() {
        let root = collection(vec![
            ModelNode::new("Bad", NodeKind::Generator(Arc::new(Broken))),
            sim("After"),
        ]);
        let items: Vec<Result<RunnableUnit, DiscoveryError>> =
            discover(&root, &DiscoveryFilter::All).collect();
        assert_eq!(items.len(), 2);
        let err = items[0].as_ref().expect_err("generator error");
        assert!(err.to_string().contains("Simulations/Bad"));
        assert_eq!(items[1].as_ref().expect("unit").name, "After");
    }

    #[test]
    fn duplicates_are_grouped_by_type_then_name() {
        let root = collection(vec![
            sim("Dup"),
            ModelNode::new("Folder", NodeKind::Folder).with_children(vec![sim("Dup")]),
            ModelNode::new("Unique", NodeKind::Generator(Arc::new(Fixed(vec![])))),
            // Same name, different type: not a collision.
            ModelNode::new("Dup", NodeKind::Generator(Arc::new(Fixed(vec![])))),
        ]);
        let duplicates = find_duplicates(&root);
        assert_eq!(
            duplicates,
            vec![Duplicate {
                type_name: "Simulation".to_string(),
                name: "Dup".to_string(),
                count: 2,
            }]
        );
        let err = check_unique_names(&root).expect_err("duplicates");
        assert_eq!(err.duplicate_names(), vec!["Dup"]);
    }

    #[test]
    fn generator_templates_are_not_counted() {
        let root = collection(vec![
            ModelNode::new("Exp1", NodeKind::Generator(Arc::new(Fixed(vec![]))))
                .with_children(vec![sim("Base")]),
            ModelNode::new("Exp2", NodeKind::Generator(Arc::new(Fixed(vec![]))))
                .with_children(vec![sim("Base")]),
        ]);
        assert!(check_unique_names(&root).is_ok());
    }
}
