//! Factorial experiments: one definition expanded into one simulation per
//! combination of factor levels.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::core::model::{ModelNode, SimulationDescription, SimulationGenerator};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Factor {
    pub name: String,
    pub levels: Vec<String>,
}

/// Full factorial design over an ordered list of factors.
///
/// Descriptions are named `<experiment><factor><level>...` and enumerated with
/// the last factor varying fastest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Factorial {
    factors: Vec<Factor>,
}

impl Factorial {
    pub fn new(factors: Vec<Factor>) -> Self {
        Self { factors }
    }
}

impl SimulationGenerator for Factorial {
    fn type_name(&self) -> &str {
        "Experiment"
    }

    fn generate(&self, node: &ModelNode) -> Result<Vec<SimulationDescription>> {
        if self.factors.is_empty() {
            bail!("experiment {} declares no factors", node.name);
        }
        if let Some(empty) = self.factors.iter().find(|factor| factor.levels.is_empty()) {
            bail!(
                "factor {} of experiment {} has no levels",
                empty.name,
                node.name
            );
        }

        let mut combos: Vec<Vec<(String, String)>> = vec![Vec::new()];
        for factor in &self.factors {
            let mut next = Vec::with_capacity(combos.len() * factor.levels.len());
            for combo in &combos {
                for level in &factor.levels {
                    let mut extended = combo.clone();
                    extended.push((factor.name.clone(), level.clone()));
                    next.push(extended);
                }
            }
            combos = next;
        }

        Ok(combos
            .into_iter()
            .map(|parameters| {
                let mut name = node.name.clone();
                for (factor, level) in &parameters {
                    name.push_str(factor);
                    name.push_str(level);
                }
                SimulationDescription { name, parameters }
            })
            .collect())
    }
}
