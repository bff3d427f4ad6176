//! In-process simulated network.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use tracing::{debug, trace};

use crate::interface::{
    BroadcastOptions, Connection, Listener, NetError, NetworkEvent, NetworkInterface, NodeId,
};

/// A registry of simulated nodes.
///
/// Cheap to clone; clones share the same registry. Each test or simulation
/// run builds its own, so ids and links never leak between runs.
#[derive(Clone, Default)]
pub struct SimNetwork {
    inner: Rc<RefCell<Registry>>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    nodes: BTreeMap<NodeId, Slot>,
    log: Vec<Transmission>,
}

#[derive(Default)]
struct Slot {
    links: BTreeSet<NodeId>,
    listeners: Vec<Listener>,
    closed: bool,
}

/// One payload delivered over one directed link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmission {
    /// Sending node.
    pub from: NodeId,
    /// Receiving node.
    pub to: NodeId,
    /// Bytes delivered.
    pub payload: Vec<u8>,
}

/// A node's handle on a [`SimNetwork`].
pub struct SimInterface {
    id: NodeId,
    network: SimNetwork,
}

impl SimNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node with the next free numeric id (`"1"`, `"2"`, ...).
    pub fn join(&self) -> SimInterface {
        let mut reg = self.inner.borrow_mut();
        let id = loop {
            reg.next_id += 1;
            let candidate = NodeId::new(reg.next_id.to_string());
            if !reg.nodes.contains_key(&candidate) {
                break candidate;
            }
        };
        reg.nodes.insert(id.clone(), Slot::default());
        debug!(node = %id, "joined simulated network");

        SimInterface {
            id,
            network: self.clone(),
        }
    }

    /// Add a node with a chosen id.
    pub fn join_as(&self, id: impl Into<NodeId>) -> Result<SimInterface, NetError> {
        let id = id.into();
        let mut reg = self.inner.borrow_mut();
        if reg.nodes.contains_key(&id) {
            return Err(NetError::DuplicateId(id));
        }
        reg.nodes.insert(id.clone(), Slot::default());
        debug!(node = %id, "joined simulated network");

        Ok(SimInterface {
            id,
            network: self.clone(),
        })
    }

    /// Drop the link between `a` and `b`. Returns whether a link existed.
    ///
    /// No event is published; neither side is told.
    pub fn disconnect(&self, a: &NodeId, b: &NodeId) -> bool {
        let mut reg = self.inner.borrow_mut();
        let removed_a = reg
            .nodes
            .get_mut(a)
            .map(|slot| slot.links.remove(b))
            .unwrap_or(false);
        let removed_b = reg
            .nodes
            .get_mut(b)
            .map(|slot| slot.links.remove(a))
            .unwrap_or(false);
        if removed_a || removed_b {
            debug!(%a, %b, "link dropped");
        }
        removed_a || removed_b
    }

    /// Ids of every node that has joined and not cleaned up.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.inner
            .borrow()
            .nodes
            .iter()
            .filter(|(_, slot)| !slot.closed)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Every undirected link, each listed once with the smaller id first.
    pub fn links(&self) -> Vec<(NodeId, NodeId)> {
        let reg = self.inner.borrow();
        reg.nodes
            .iter()
            .flat_map(|(id, slot)| {
                slot.links
                    .iter()
                    .filter(move |peer| id < *peer)
                    .map(move |peer| (id.clone(), peer.clone()))
            })
            .collect()
    }

    /// Every payload delivered so far, in delivery order.
    pub fn transmissions(&self) -> Vec<Transmission> {
        self.inner.borrow().log.clone()
    }

    /// Number of payloads delivered so far.
    pub fn transmission_count(&self) -> usize {
        self.inner.borrow().log.len()
    }

    /// Forget the delivery log.
    pub fn clear_transmissions(&self) {
        self.inner.borrow_mut().log.clear();
    }

    fn is_reachable(&self, id: &NodeId) -> bool {
        self.inner
            .borrow()
            .nodes
            .get(id)
            .map(|slot| !slot.closed)
            .unwrap_or(false)
    }

    fn deliver(&self, to: &NodeId, event: NetworkEvent) {
        let mut reg = self.inner.borrow_mut();

        if let NetworkEvent::Data {
            connection,
            payload,
        } = &event
        {
            trace!(from = %connection.id(), %to, bytes = payload.len(), "deliver");
            reg.log.push(Transmission {
                from: connection.id().clone(),
                to: to.clone(),
                payload: payload.clone(),
            });
        }

        if let Some(slot) = reg.nodes.get_mut(to) {
            for listener in slot.listeners.iter_mut() {
                listener(&event);
            }
        }
    }

    fn linked(&self, a: &NodeId, b: &NodeId) -> bool {
        self.inner
            .borrow()
            .nodes
            .get(a)
            .map(|slot| slot.links.contains(b))
            .unwrap_or(false)
    }
}

impl SimInterface {
    /// The network this node belongs to.
    pub fn network(&self) -> &SimNetwork {
        &self.network
    }
}

impl NetworkInterface for SimInterface {
    fn id(&self) -> &NodeId {
        &self.id
    }

    fn connect_to(&mut self, peer: &NodeId) -> Result<Connection, NetError> {
        if *peer == self.id {
            return Err(NetError::SelfConnect);
        }
        if !self.network.is_reachable(peer) || !self.network.is_reachable(&self.id) {
            return Err(NetError::UnknownPeer(peer.clone()));
        }
        if self.network.linked(&self.id, peer) {
            return Ok(Connection::new(peer.clone()));
        }

        {
            let mut reg = self.network.inner.borrow_mut();
            if let Some(slot) = reg.nodes.get_mut(&self.id) {
                slot.links.insert(peer.clone());
            }
            if let Some(slot) = reg.nodes.get_mut(peer) {
                slot.links.insert(self.id.clone());
            }
        }
        debug!(node = %self.id, %peer, "link open");

        self.network.deliver(
            &self.id,
            NetworkEvent::ConnectionOpen(Connection::new(peer.clone())),
        );
        self.network.deliver(
            peer,
            NetworkEvent::ConnectionOpen(Connection::new(self.id.clone())),
        );

        Ok(Connection::new(peer.clone()))
    }

    fn send(&self, connection: &Connection, payload: &[u8]) -> Result<(), NetError> {
        let peer = connection.id();
        if !self.network.linked(&self.id, peer) {
            return Err(NetError::NotConnected(peer.clone()));
        }

        self.network.deliver(
            peer,
            NetworkEvent::Data {
                connection: Connection::new(self.id.clone()),
                payload: payload.to_vec(),
            },
        );
        Ok(())
    }

    fn broadcast(&self, payload: &[u8], options: &BroadcastOptions) {
        for peer in self.peers() {
            if options.exclude_ids.contains(&peer) {
                continue;
            }
            self.network.deliver(
                &peer,
                NetworkEvent::Data {
                    connection: Connection::new(self.id.clone()),
                    payload: payload.to_vec(),
                },
            );
        }
    }

    fn subscribe(&mut self, listener: Listener) {
        let mut reg = self.network.inner.borrow_mut();
        if let Some(slot) = reg.nodes.get_mut(&self.id) {
            slot.listeners.push(listener);
        }
    }

    fn peers(&self) -> Vec<NodeId> {
        self.network
            .inner
            .borrow()
            .nodes
            .get(&self.id)
            .map(|slot| slot.links.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn cleanup(&mut self) {
        let mut reg = self.network.inner.borrow_mut();
        let links = match reg.nodes.get_mut(&self.id) {
            Some(slot) => {
                slot.closed = true;
                slot.listeners.clear();
                std::mem::take(&mut slot.links)
            }
            None => return,
        };
        for peer in &links {
            if let Some(slot) = reg.nodes.get_mut(peer) {
                slot.links.remove(&self.id);
            }
        }
        debug!(node = %self.id, links = links.len(), "cleaned up");
    }
}
