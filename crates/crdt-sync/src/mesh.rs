//! A simulated mesh of engines, pumped to quiescence.

use crdt_doc::{Document, ReplicatedDoc};
use crdt_net::{NetError, NetworkInterface, NodeId, SimInterface, SimNetwork};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::SyncConfig;
use crate::engine::SyncEngine;
use crate::error::SyncError;

/// Mesh harness settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshConfig {
    /// Upper bound on drain rounds in [`Mesh::settle`].
    pub max_rounds: usize,
    /// Configuration given to every engine added afterwards.
    pub sync: SyncConfig,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            max_rounds: 10_000,
            sync: SyncConfig::default(),
        }
    }
}

/// Errors from the mesh harness.
#[derive(Debug, Error)]
pub enum MeshError {
    /// Events were still pending after the round limit.
    #[error("mesh did not quiesce within {rounds} rounds")]
    NotQuiescent {
        /// Rounds run before giving up.
        rounds: usize,
    },
    /// No engine with this id is part of the mesh.
    #[error("unknown node: {0}")]
    UnknownNode(NodeId),
    /// The simulated network refused an operation.
    #[error(transparent)]
    Net(#[from] NetError),
    /// An engine operation failed.
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Shape of a generated mesh. Edges are between node indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    /// `0 - 1 - 2 - ... - n-1`
    Chain,
    /// A chain closed back to node 0.
    Ring,
    /// Node 0 linked to every other node.
    Star,
    /// Every pair linked.
    Full,
    /// A random spanning tree plus up to `extra_edges` more links.
    Random {
        /// Links added on top of the spanning tree.
        extra_edges: usize,
        /// RNG seed; the same seed always gives the same graph.
        seed: u64,
    },
}

impl Topology {
    /// Undirected edges of this topology over `n` nodes. Always connected.
    pub fn edges(&self, n: usize) -> Vec<(usize, usize)> {
        if n < 2 {
            return Vec::new();
        }
        match *self {
            Topology::Chain => (1..n).map(|i| (i - 1, i)).collect(),
            Topology::Ring => {
                let mut edges: Vec<_> = (1..n).map(|i| (i - 1, i)).collect();
                if n > 2 {
                    edges.push((n - 1, 0));
                }
                edges
            }
            Topology::Star => (1..n).map(|i| (0, i)).collect(),
            Topology::Full => (0..n)
                .flat_map(|i| (i + 1..n).map(move |j| (i, j)))
                .collect(),
            Topology::Random { extra_edges, seed } => {
                let mut rng = StdRng::seed_from_u64(seed);
                let mut edges: Vec<(usize, usize)> =
                    (1..n).map(|i| (rng.gen_range(0..i), i)).collect();

                let max_edges = n * (n - 1) / 2;
                let target = (edges.len() + extra_edges).min(max_edges);
                while edges.len() < target {
                    let a = rng.gen_range(0..n);
                    let b = rng.gen_range(0..n);
                    let edge = (a.min(b), a.max(b));
                    if a != b && !edges.iter().any(|&(x, y)| (x.min(y), x.max(y)) == edge) {
                        edges.push(edge);
                    }
                }
                edges
            }
        }
    }
}

/// A [`SimNetwork`] with one [`SyncEngine`] per node.
pub struct Mesh<D: ReplicatedDoc = Document> {
    network: SimNetwork,
    engines: Vec<SyncEngine<SimInterface, D>>,
    config: MeshConfig,
}

impl Mesh<Document> {
    /// An empty mesh with default settings.
    pub fn new() -> Self {
        Self::with_config(MeshConfig::default())
    }

    /// Build `n` nodes linked as `topology` describes, and settle.
    pub fn build(topology: Topology, n: usize, config: MeshConfig) -> Result<Self, MeshError> {
        Self::with_topology(topology, n, config)
    }
}

impl Default for Mesh<Document> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: ReplicatedDoc> Mesh<D> {
    /// An empty mesh.
    pub fn with_config(config: MeshConfig) -> Self {
        Self {
            network: SimNetwork::new(),
            engines: Vec::new(),
            config,
        }
    }

    /// Build `n` nodes of any document type linked as `topology` describes,
    /// and settle.
    pub fn with_topology(
        topology: Topology,
        n: usize,
        config: MeshConfig,
    ) -> Result<Self, MeshError> {
        let mut mesh = Self::with_config(config);
        let ids: Vec<NodeId> = (0..n).map(|_| mesh.add_node()).collect();
        for (a, b) in topology.edges(n) {
            mesh.connect(&ids[a], &ids[b])?;
        }
        mesh.settle()?;
        info!(nodes = n, ?topology, "mesh built");
        Ok(mesh)
    }

    /// Add a node with a generated id.
    pub fn add_node(&mut self) -> NodeId {
        let iface = self.network.join();
        self.push(iface)
    }

    /// Add a node with a chosen id.
    pub fn add_named_node(&mut self, id: impl Into<NodeId>) -> Result<NodeId, MeshError> {
        let iface = self.network.join_as(id)?;
        Ok(self.push(iface))
    }

    fn push(&mut self, iface: SimInterface) -> NodeId {
        let engine = SyncEngine::builder(iface)
            .config(self.config.sync.clone())
            .build();
        let id = engine.id().clone();
        debug!(node = %id, "node added");
        self.engines.push(engine);
        id
    }

    /// Link two nodes. Events are queued until the next [`settle`](Self::settle).
    pub fn connect(&mut self, a: &NodeId, b: &NodeId) -> Result<(), MeshError> {
        if self.node(b).is_none() {
            return Err(MeshError::UnknownNode(b.clone()));
        }
        let engine = self
            .node_mut(a)
            .ok_or_else(|| MeshError::UnknownNode(a.clone()))?;
        engine.network_mut().connect_to(b)?;
        Ok(())
    }

    /// Drop the link between two nodes, if any.
    pub fn disconnect(&mut self, a: &NodeId, b: &NodeId) -> bool {
        self.network.disconnect(a, b)
    }

    /// Drain every engine until a whole round handles nothing. Returns the
    /// number of rounds that handled at least one event.
    pub fn settle(&mut self) -> Result<usize, MeshError> {
        for round in 0..self.config.max_rounds {
            let handled: usize = self
                .engines
                .iter_mut()
                .map(|engine| engine.process_pending())
                .sum();
            if handled == 0 {
                debug!(rounds = round, "mesh quiescent");
                return Ok(round);
            }
        }
        Err(MeshError::NotQuiescent {
            rounds: self.config.max_rounds,
        })
    }

    /// The engine for `id`.
    pub fn node(&self, id: &NodeId) -> Option<&SyncEngine<SimInterface, D>> {
        self.engines.iter().find(|e| e.id() == id)
    }

    /// The engine for `id`, mutably.
    pub fn node_mut(&mut self, id: &NodeId) -> Option<&mut SyncEngine<SimInterface, D>> {
        self.engines.iter_mut().find(|e| e.id() == id)
    }

    /// Every engine, in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &SyncEngine<SimInterface, D>> {
        self.engines.iter()
    }

    /// Ids of every node, in insertion order.
    pub fn ids(&self) -> Vec<NodeId> {
        self.engines.iter().map(|e| e.id().clone()).collect()
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.engines.len()
    }

    /// Whether the mesh has no nodes.
    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// The underlying simulated network.
    pub fn network(&self) -> &SimNetwork {
        &self.network
    }

    /// Take a node out of the mesh and release its links.
    pub fn remove_node(&mut self, id: &NodeId) -> Result<(), MeshError> {
        let index = self
            .engines
            .iter()
            .position(|e| e.id() == id)
            .ok_or_else(|| MeshError::UnknownNode(id.clone()))?;
        self.engines.remove(index).cleanup();
        Ok(())
    }
}

impl<D: ReplicatedDoc + PartialEq> Mesh<D> {
    /// Whether every node holds the same session and an equal document.
    pub fn is_converged(&self) -> bool {
        let mut engines = self.engines.iter();
        let Some(first) = engines.next() else {
            return true;
        };
        let (Some(session), Some(doc)) = (first.session_id(), first.shared_data()) else {
            return false;
        };
        engines.all(|e| e.session_id() == Some(session) && e.shared_data() == Some(doc))
    }
}
