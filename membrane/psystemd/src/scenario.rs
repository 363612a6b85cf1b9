//! JSON scenario: configuration, seed membrane trees, port wiring, messages
//! and rules.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, Context};
use serde::Deserialize;

use membrane_core::{Membrane, PSystem};
use membrane_spec::{
    Boundary, ConnectionType, MembraneId, MembraneState, MessagePayload, Outbound,
    PSystemConfig, PSystemRule, PortId, TENSOR_INPUT, TENSOR_OUTPUT,
};

/// Seed membrane; roots use their name as id.
#[derive(Debug, Clone, Deserialize)]
pub struct MembraneSeed {
    pub name: String,
    #[serde(default)]
    pub state: MembraneState,
    #[serde(default)]
    pub boundary: Option<Boundary>,
    #[serde(default)]
    pub children: Vec<MembraneSeed>,
}

/// Port-to-port wiring between named membranes.
#[derive(Debug, Clone, Deserialize)]
pub struct Wire {
    pub from: String,
    #[serde(default = "tensor_output")]
    pub from_port: String,
    pub to: String,
    #[serde(default = "tensor_input")]
    pub to_port: String,
    #[serde(default)]
    pub connection_type: ConnectionType,
}

fn tensor_output() -> String {
    TENSOR_OUTPUT.to_string()
}

fn tensor_input() -> String {
    TENSOR_INPUT.to_string()
}

/// Tensor sent from a named membrane before the first cycle.
#[derive(Debug, Clone, Deserialize)]
pub struct Injection {
    pub from: String,
    #[serde(default = "tensor_output")]
    pub port: String,
    pub values: Vec<f32>,
    #[serde(default)]
    pub shape: Option<Vec<usize>>,
}

impl Injection {
    pub fn outbound(&self) -> Outbound {
        let shape = self.shape.clone().unwrap_or_else(|| vec![self.values.len()]);
        MessagePayload::tensor(&self.values, shape).into()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub config: PSystemConfig,
    #[serde(default)]
    pub membranes: Vec<MembraneSeed>,
    #[serde(default)]
    pub connections: Vec<Wire>,
    #[serde(default)]
    pub messages: Vec<Injection>,
    #[serde(default)]
    pub rules: Vec<PSystemRule>,
}

/// Seed names and the membrane ids they resolved to.
#[derive(Debug, Clone, Default)]
pub struct Names(BTreeMap<String, MembraneId>);

impl Names {
    pub fn get(&self, name: &str) -> Option<&MembraneId> {
        self.0.get(name)
    }

    pub fn port(&self, membrane: &str, suffix: &str) -> anyhow::Result<PortId> {
        let id = self
            .get(membrane)
            .ok_or_else(|| anyhow!("scenario names no membrane {membrane:?}"))?;
        Ok(PortId::for_membrane(id, suffix))
    }

    fn remember(&mut self, name: &str, id: MembraneId) -> anyhow::Result<()> {
        if self.0.insert(name.to_string(), id).is_some() {
            return Err(anyhow!("membrane name {name:?} is used twice"));
        }
        Ok(())
    }
}

/// A built system plus its seed names.
pub struct Seeded {
    pub system: PSystem,
    pub names: Names,
}

impl Scenario {
    pub async fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading scenario {}", path.display()))?;
        serde_json::from_slice(&data).with_context(|| format!("parsing scenario {}", path.display()))
    }

    /// Build the system, seed membranes, wire ports and register rules.
    /// Messages are left to the caller.
    pub fn build(&self) -> anyhow::Result<Seeded> {
        let system = PSystem::new(self.config.clone())?;
        let mut names = Names::default();
        for root in &self.membranes {
            let membrane = Membrane::new(
                root.name.as_str(),
                root.name.clone(),
                root.state.clone(),
                root.boundary.unwrap_or_default(),
            );
            let id = system
                .add_root_membrane(membrane)
                .with_context(|| format!("admitting root {}", root.name))?;
            names.remember(&root.name, id.clone())?;
            seed_children(&system, &mut names, &id, &root.children)?;
        }
        for wire in &self.connections {
            let source = names.port(&wire.from, &wire.from_port)?;
            let target = names.port(&wire.to, &wire.to_port)?;
            system
                .connect_ports(&source, &target, wire.connection_type)
                .with_context(|| format!("connecting {source} to {target}"))?;
        }
        for rule in &self.rules {
            system
                .add_rule(rule.clone())
                .with_context(|| format!("registering rule {}", rule.id))?;
        }
        Ok(Seeded { system, names })
    }
}

fn seed_children(
    system: &PSystem,
    names: &mut Names,
    parent: &MembraneId,
    children: &[MembraneSeed],
) -> anyhow::Result<()> {
    for seed in children {
        let id = system
            .create_child_membrane(parent, seed.state.clone(), Some(&seed.name), seed.boundary)
            .with_context(|| format!("creating {} under {parent}", seed.name))?;
        names.remember(&seed.name, id.clone())?;
        seed_children(system, names, &id, &seed.children)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"{
        "config": {"id": "demo", "max_depth": 4, "distribution_strategy": "breadth-first"},
        "membranes": [
            {"name": "cell", "children": [{"name": "nucleus"}, {"name": "vacuole"}]}
        ],
        "connections": [{"from": "nucleus", "to": "vacuole"}],
        "messages": [{"from": "nucleus", "values": [1.0, 2.0]}],
        "rules": [
            {"id": "grow", "actions": [{"type": "create_membrane", "parent": {"select": "strategy"}}], "max_executions": 1}
        ]
    }"#;

    #[test]
    fn builds_named_tree() {
        let scenario: Scenario = serde_json::from_str(SCENARIO).unwrap();
        let seeded = scenario.build().unwrap();
        assert_eq!(seeded.system.membrane_count(), 3);
        assert_eq!(seeded.names.get("cell").unwrap().as_str(), "cell");
        assert_eq!(seeded.names.get("nucleus").unwrap().as_str(), "demo-m1");
        assert_eq!(seeded.system.get_statistics().total_connections, 3);
        assert_eq!(seeded.system.rules().len(), 1);
        assert_eq!(scenario.messages[0].outbound().payload.shape, Some(vec![2]));
    }

    #[test]
    fn duplicate_names_are_refused() {
        let scenario: Scenario = serde_json::from_str(
            r#"{"membranes": [{"name": "a", "children": [{"name": "a"}]}]}"#,
        )
        .unwrap();
        assert!(scenario.build().is_err());
    }

    #[test]
    fn unknown_wire_endpoint() {
        let scenario: Scenario = serde_json::from_str(
            r#"{"membranes": [{"name": "a"}], "connections": [{"from": "a", "to": "ghost"}]}"#,
        )
        .unwrap();
        let err = scenario.build().err().unwrap();
        assert!(err.to_string().contains("ghost"));
    }
}
