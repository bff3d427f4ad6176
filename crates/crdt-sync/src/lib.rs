//! # crdt-sync
//!
//! Keeps one replicated document in sync across a peer-to-peer mesh where
//! nodes only talk to their direct neighbors.
//!
//! Every message is flooded: each node forwards it once to every neighbor
//! except the one it came from, so edits reach nodes several hops away
//! through relays. A **session** ties the mesh to one document lifetime. The
//! first node calls [`SyncEngine::init_shared_data`] and the others adopt its
//! history from the `initSession` message, or ask for it with
//! `requestSessionInit` when they connect late.
//!
//! ## Quick Start
//!
//! ```
//! use crdt_sync::{Mesh, MeshConfig, Topology};
//!
//! // a - b - c
//! let mut mesh = Mesh::build(Topology::Chain, 3, MeshConfig::default()).unwrap();
//! let ids = mesh.ids();
//!
//! mesh.node_mut(&ids[0])
//!     .unwrap()
//!     .init_shared_data(|d| d.put("message", "initialized from a"))
//!     .unwrap();
//! mesh.settle().unwrap();
//!
//! mesh.node_mut(&ids[2])
//!     .unwrap()
//!     .update_data(|d| d.put("message", "updated from c"))
//!     .unwrap();
//! mesh.settle().unwrap();
//!
//! assert!(mesh.is_converged());
//! let doc = mesh.node(&ids[0]).unwrap().shared_data().unwrap();
//! assert_eq!(doc.get_str("message"), Some("updated from c"));
//! ```
//!
//! ## Wire format
//!
//! Messages are JSON objects with a `type` tag and a header of `sessionId`,
//! `originId`, `msgId` and `relay`. See [`codec`].

#![warn(missing_docs)]

pub mod codec;
mod config;
mod dedup;
mod engine;
mod error;
mod mesh;
pub mod message;

pub use codec::WireError;
pub use config::SyncConfig;
pub use engine::{ChangeListener, DocumentChange, SyncEngine, SyncEngineBuilder};
pub use error::SyncError;
pub use message::{Message, MessageId, Payload, SessionId};
pub use mesh::{Mesh, MeshConfig, MeshError, Topology};
