//! Scripted scenarios loaded from TOML.
//!
//! ```toml
//! [mesh]
//! nodes = ["a", "b", "c"]
//! edges = [["a", "b"], ["b", "c"]]
//!
//! [[step]]
//! node = "a"
//! action = "init"
//! set = { message = "hello" }
//! ```

use std::collections::BTreeSet;
use std::path::Path;

use crdt_doc::Draft;
use crdt_net::NodeId;
use crdt_sync::{Mesh, MeshConfig, SyncConfig};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::info;

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

/// A parsed scenario file.
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub mesh: MeshSection,
    #[serde(default, rename = "step")]
    pub steps: Vec<Step>,
}

/// The `[mesh]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct MeshSection {
    pub nodes: Vec<String>,
    #[serde(default)]
    pub edges: Vec<(String, String)>,
    pub max_rounds: Option<usize>,
    #[serde(default = "default_request_on_connect")]
    pub request_on_connect: bool,
}

fn default_request_on_connect() -> bool {
    true
}

/// One `[[step]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct Step {
    pub node: String,
    pub action: Action,
    #[serde(default)]
    pub set: Map<String, Value>,
    #[serde(default)]
    pub keys: Vec<String>,
    pub peer: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    Init,
    Update,
    RequestSync,
    Connect,
    Delete,
}

/// A scenario after it has run.
pub struct Outcome {
    pub mesh: Mesh,
    pub rounds: usize,
}

/// Read and validate a scenario file.
pub fn load(path: &Path) -> Result<Scenario> {
    if !path.exists() {
        return Err(format!("Scenario file not found: {}", path.display()).into());
    }
    let content = std::fs::read_to_string(path)?;
    parse(&content)
}

/// Parse and validate scenario TOML.
pub fn parse(content: &str) -> Result<Scenario> {
    let scenario: Scenario =
        toml::from_str(content).map_err(|e| format!("Invalid scenario: {e}"))?;
    scenario.validate()?;
    Ok(scenario)
}

impl Scenario {
    fn validate(&self) -> Result<()> {
        if self.mesh.nodes.is_empty() {
            return Err("Scenario has no nodes".into());
        }

        let mut names = BTreeSet::new();
        for name in &self.mesh.nodes {
            if !names.insert(name.as_str()) {
                return Err(format!("Duplicate node '{name}'").into());
            }
        }
        let known = |name: &str| -> Result<()> {
            if names.contains(name) {
                Ok(())
            } else {
                Err(format!("Unknown node '{name}'").into())
            }
        };

        for (a, b) in &self.mesh.edges {
            known(a)?;
            known(b)?;
        }

        for (i, step) in self.steps.iter().enumerate() {
            let n = i + 1;
            known(&step.node)?;
            match step.action {
                Action::Init | Action::Update if step.set.is_empty() => {
                    return Err(format!("Step {n}: '{:?}' needs a `set` table", step.action).into());
                }
                Action::Delete if step.keys.is_empty() => {
                    return Err(format!("Step {n}: 'delete' needs `keys`").into());
                }
                Action::Connect => match &step.peer {
                    Some(peer) => known(peer)?,
                    None => return Err(format!("Step {n}: 'connect' needs a `peer`").into()),
                },
                _ => {}
            }
        }
        Ok(())
    }

    fn mesh_config(&self) -> MeshConfig {
        let defaults = MeshConfig::default();
        MeshConfig {
            max_rounds: self.mesh.max_rounds.unwrap_or(defaults.max_rounds),
            sync: SyncConfig {
                request_on_connect: self.mesh.request_on_connect,
            },
        }
    }

    /// Build the mesh, run every step, and settle after each one.
    pub fn run(&self) -> Result<Outcome> {
        let mut mesh: Mesh = Mesh::with_config(self.mesh_config());
        for name in &self.mesh.nodes {
            mesh.add_named_node(name.as_str())?;
        }
        for (a, b) in &self.mesh.edges {
            mesh.connect(&NodeId::from(a.as_str()), &NodeId::from(b.as_str()))?;
        }
        let mut rounds = mesh.settle()?;

        for (i, step) in self.steps.iter().enumerate() {
            apply(&mut mesh, step)
                .map_err(|e| format!("Step {} ({:?} on '{}'): {e}", i + 1, step.action, step.node))?;
            rounds += mesh.settle()?;
            info!(step = i + 1, action = ?step.action, node = %step.node, "step done");
        }

        Ok(Outcome { mesh, rounds })
    }
}

fn apply(mesh: &mut Mesh, step: &Step) -> Result<()> {
    let id = NodeId::from(step.node.as_str());

    if step.action == Action::Connect {
        let peer = step.peer.as_deref().ok_or("missing peer")?;
        mesh.connect(&id, &NodeId::from(peer))?;
        return Ok(());
    }

    let engine = mesh
        .node_mut(&id)
        .ok_or_else(|| format!("Unknown node '{id}'"))?;
    match step.action {
        Action::Init => {
            engine.init_shared_data(|d| put_all(d, &step.set))?;
        }
        Action::Update => engine.update_data(|d| put_all(d, &step.set))?,
        Action::Delete => engine.update_data(|d| {
            for key in &step.keys {
                d.delete(key);
            }
        })?,
        Action::RequestSync => engine.request_shared_data_sync()?,
        Action::Connect => {}
    }
    Ok(())
}

fn put_all(draft: &mut Draft, set: &Map<String, Value>) {
    for (key, value) in set {
        draft.put(key.as_str(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crdt_sync::MeshError;

    const CHAIN: &str = include_str!("../scenarios/chain.toml");

    #[test]
    fn parse_sample_scenario() {
        let scenario = parse(CHAIN).unwrap();
        assert_eq!(scenario.mesh.nodes, vec!["a", "b", "c", "d"]);
        assert_eq!(scenario.mesh.edges.len(), 2);
        assert_eq!(scenario.steps.len(), 5);
        assert_eq!(scenario.steps[0].action, Action::Init);
        assert_eq!(scenario.steps[2].peer.as_deref(), Some("c"));
        assert_eq!(scenario.steps[3].keys, vec!["count"]);
        assert!(scenario.mesh.request_on_connect);
    }

    #[test]
    fn run_sample_scenario() {
        let outcome = parse(CHAIN).unwrap().run().unwrap();
        assert!(outcome.mesh.is_converged());

        let doc = outcome
            .mesh
            .node(&NodeId::from("d"))
            .unwrap()
            .shared_data()
            .unwrap();
        assert_eq!(doc.get_str("message"), Some("updated from D"));
        assert!(!doc.contains_key("count"));
    }

    #[test]
    fn rejects_unknown_nodes() {
        let toml = r#"
[mesh]
nodes = ["a"]
edges = [["a", "z"]]
"#;
        let err = parse(toml).unwrap_err();
        assert!(err.to_string().contains("'z'"));
    }

    #[test]
    fn connect_needs_peer() {
        let toml = r#"
[mesh]
nodes = ["a", "b"]

[[step]]
node = "a"
action = "connect"
"#;
        let err = parse(toml).unwrap_err();
        assert!(err.to_string().contains("peer"));
    }

    #[test]
    fn unknown_action_is_a_parse_error() {
        let toml = r#"
[mesh]
nodes = ["a"]

[[step]]
node = "a"
action = "explode"
"#;
        assert!(parse(toml).is_err());
    }

    #[test]
    fn failing_step_names_itself() {
        let toml = r#"
[mesh]
nodes = ["a", "b"]
edges = [["a", "b"]]

[[step]]
node = "b"
action = "update"
set = { message = "too early" }
"#;
        let err = parse(toml).unwrap().run().err().unwrap();
        assert!(err.to_string().starts_with("Step 1"));
    }

    #[test]
    fn round_limit_comes_from_file() {
        let toml = r#"
[mesh]
nodes = ["a", "b", "c"]
edges = [["a", "b"], ["b", "c"]]
max_rounds = 1

[[step]]
node = "a"
action = "init"
set = { message = "hi" }
"#;
        let scenario = parse(toml).unwrap();
        assert_eq!(scenario.mesh_config().max_rounds, 1);
        let err = scenario.run().err().unwrap();
        assert!(err.downcast_ref::<MeshError>().is_some());
    }
}
