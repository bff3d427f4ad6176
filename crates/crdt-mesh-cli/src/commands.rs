use std::path::Path;

use console::style;
use crdt_net::NodeId;
use crdt_sync::{Mesh, MeshConfig, Topology};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::scenario;

type Result = std::result::Result<(), Box<dyn std::error::Error>>;

/// Field names random edits write to.
const FIELDS: [&str; 4] = ["title", "status", "owner", "note"];

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
    converged: bool,
    rounds: usize,
    links: usize,
    transmissions: usize,
    nodes: Vec<NodeReport>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NodeReport {
    id: String,
    session_id: Option<String>,
    seen_messages: usize,
    document: Option<Value>,
}

/// `crdt-mesh simulate`: random edits over a generated topology.
pub fn simulate(topology: Topology, nodes: usize, edits: usize, seed: u64, json: bool) -> Result {
    if nodes == 0 {
        return Err("A mesh needs at least one node".into());
    }

    let mut mesh = Mesh::build(topology, nodes, MeshConfig::default())?;
    let ids = mesh.ids();
    let mut rng = StdRng::seed_from_u64(seed);

    engine(&mut mesh, &ids[0])?.init_shared_data(|d| d.put("edits", 0))?;
    let mut rounds = mesh.settle()?;

    for i in 1..=edits {
        let id = &ids[rng.gen_range(0..ids.len())];
        let field = FIELDS[rng.gen_range(0..FIELDS.len())];
        let delete = rng.gen_bool(0.2);

        engine(&mut mesh, id)?.update_data(|d| {
            if delete {
                d.delete(field);
            } else {
                d.put(field, format!("{id}#{i}"));
            }
            d.put("edits", i);
        })?;
        rounds += mesh.settle()?;
        debug!(edit = i, node = %id, field, delete, "edit settled");
    }

    if !json {
        println!("Topology: {topology:?}, {nodes} nodes, {edits} edits (seed {seed})");
    }
    report(&mesh, Some(seed), rounds, json)
}

/// `crdt-mesh run <scenario.toml>`: run a scripted scenario.
pub fn run(path: &str, json: bool) -> Result {
    let scenario = scenario::load(Path::new(path))?;
    let outcome = scenario.run()?;

    if !json {
        println!(
            "Scenario: {path} ({} nodes, {} steps)",
            scenario.mesh.nodes.len(),
            scenario.steps.len()
        );
    }
    report(&outcome.mesh, None, outcome.rounds, json)
}

// ── Helpers ──────────────────────────────────────────────────────────

fn engine<'m>(
    mesh: &'m mut Mesh,
    id: &NodeId,
) -> std::result::Result<&'m mut crdt_sync::SyncEngine<crdt_net::SimInterface>, String> {
    mesh.node_mut(id).ok_or_else(|| format!("Unknown node '{id}'"))
}

fn report(mesh: &Mesh, seed: Option<u64>, rounds: usize, json: bool) -> Result {
    let report = Report {
        seed,
        converged: mesh.is_converged(),
        rounds,
        links: mesh.network().links().len(),
        transmissions: mesh.network().transmission_count(),
        nodes: mesh
            .nodes()
            .map(|e| NodeReport {
                id: e.id().to_string(),
                session_id: e.session_id().map(|s| s.to_string()),
                seen_messages: e.seen_message_count(),
                document: e.shared_data().map(|d| d.to_json()),
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_table(&report);
    }

    if report.converged {
        Ok(())
    } else {
        Err("Replicas diverged".into())
    }
}

fn print_table(report: &Report) {
    println!();
    println!("  {:<10} {:>8}  Document", "Node", "Seen");
    println!("  {}", "-".repeat(60));
    for node in &report.nodes {
        let document = match &node.document {
            Some(doc) => doc.to_string(),
            None => style("(uninitialized)").dim().to_string(),
        };
        println!("  {:<10} {:>8}  {document}", node.id, node.seen_messages);
    }
    println!("  {}", "-".repeat(60));
    println!();

    let session = report
        .nodes
        .first()
        .and_then(|n| n.session_id.as_deref())
        .unwrap_or("-");
    println!("Session: {session}");
    println!(
        "Links: {}  Transmissions: {}  Rounds: {}",
        report.links, report.transmissions, report.rounds
    );

    if report.converged {
        println!("{}", style("All replicas converged").green().bold());
    } else {
        println!("{}", style("Replicas diverged").red().bold());
    }
}
