use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

mod commands;
mod scenario;

/// crdt-mesh: Simulate flood-synchronized documents over a peer-to-peer mesh.
///
/// Every node keeps a replica of one shared document. Edits travel only over
/// direct links and are relayed hop by hop until every node has them.
#[derive(Parser)]
#[command(name = "crdt-mesh", version, about, long_about = None)]
struct Cli {
    /// Log filter, e.g. `debug` or `crdt_sync=trace`. `RUST_LOG` wins if set.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a mesh, initialize it from the first node, and apply random edits.
    Simulate {
        /// Shape of the mesh.
        #[arg(short, long, value_enum, default_value = "ring")]
        topology: TopologyArg,

        /// Number of nodes.
        #[arg(short, long, default_value = "5")]
        nodes: usize,

        /// Number of random edits after initialization.
        #[arg(short, long, default_value = "10")]
        edits: usize,

        /// Links added on top of the spanning tree for `random`.
        #[arg(long, default_value = "2")]
        extra_edges: usize,

        /// RNG seed. Random if omitted.
        #[arg(short, long)]
        seed: Option<u64>,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Run a scripted scenario from a TOML file.
    Run {
        /// Path to the scenario file.
        scenario: String,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum TopologyArg {
    Chain,
    Ring,
    Star,
    Full,
    Random,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let result: Result<(), Box<dyn std::error::Error>> = match cli.command {
        Commands::Simulate {
            topology,
            nodes,
            edits,
            extra_edges,
            seed,
            json,
        } => {
            let seed = seed.unwrap_or_else(rand::random);
            let topology = match topology {
                TopologyArg::Chain => crdt_sync::Topology::Chain,
                TopologyArg::Ring => crdt_sync::Topology::Ring,
                TopologyArg::Star => crdt_sync::Topology::Star,
                TopologyArg::Full => crdt_sync::Topology::Full,
                TopologyArg::Random => crdt_sync::Topology::Random { extra_edges, seed },
            };
            commands::simulate(topology, nodes, edits, seed, json)
        }
        Commands::Run { scenario, json } => commands::run(&scenario, json),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        process::exit(1);
    }
}
