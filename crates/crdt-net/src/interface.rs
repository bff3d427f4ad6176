use core::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of a node, assigned by its network interface.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Wrap a raw identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A direct link to one peer. Its id is the peer's [`NodeId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Connection {
    peer: NodeId,
}

impl Connection {
    /// Link to `peer`.
    pub fn new(peer: NodeId) -> Self {
        Self { peer }
    }

    /// The peer at the other end.
    pub fn id(&self) -> &NodeId {
        &self.peer
    }
}

/// Something that happened on a node's links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    /// A link became ready, whichever side opened it.
    ConnectionOpen(Connection),
    /// A payload arrived on a link.
    Data {
        /// Link the payload arrived on.
        connection: Connection,
        /// Raw bytes as sent.
        payload: Vec<u8>,
    },
}

/// Options for [`NetworkInterface::broadcast`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastOptions {
    /// Peers that must not receive this broadcast.
    pub exclude_ids: Vec<NodeId>,
}

impl BroadcastOptions {
    /// Broadcast to everyone except `peer`.
    pub fn excluding(peer: &NodeId) -> Self {
        Self {
            exclude_ids: vec![peer.clone()],
        }
    }
}

/// A subscriber to a node's network events.
///
/// Listeners run synchronously inside the interface and must not call back
/// into it.
pub type Listener = Box<dyn FnMut(&NetworkEvent)>;

/// Errors reported by a network interface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetError {
    /// No reachable node has this id.
    #[error("unknown peer: {0}")]
    UnknownPeer(NodeId),
    /// A node tried to link to itself.
    #[error("cannot connect a node to itself")]
    SelfConnect,
    /// There is no open link to this peer.
    #[error("not connected to {0}")]
    NotConnected(NodeId),
    /// The id is already taken in this network.
    #[error("node id already in use: {0}")]
    DuplicateId(NodeId),
}

/// One node's access to the mesh.
pub trait NetworkInterface {
    /// This node's identifier.
    fn id(&self) -> &NodeId;

    /// Open a direct link to `peer`.
    ///
    /// Publishes [`NetworkEvent::ConnectionOpen`] on both ends. Connecting to
    /// an already linked peer returns the existing link and publishes nothing.
    fn connect_to(&mut self, peer: &NodeId) -> Result<Connection, NetError>;

    /// Send to one linked peer.
    fn send(&self, connection: &Connection, payload: &[u8]) -> Result<(), NetError>;

    /// Send to every linked peer not excluded by `options`.
    fn broadcast(&self, payload: &[u8], options: &BroadcastOptions);

    /// Register a listener for this node's events.
    fn subscribe(&mut self, listener: Listener);

    /// Currently linked peers.
    fn peers(&self) -> Vec<NodeId>;

    /// Close every link and drop every listener.
    fn cleanup(&mut self);
}
