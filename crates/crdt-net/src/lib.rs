//! # crdt-net
//!
//! The point-to-point transport capability consumed by `crdt-sync`.
//!
//! A [`NetworkInterface`] is one node's view of the mesh: it has a stable
//! [`NodeId`], opens direct links to other nodes, sends to one link or
//! broadcasts to all of them, and publishes [`NetworkEvent`]s to subscribers.
//!
//! [`SimNetwork`] is an explicit in-process registry of simulated nodes for
//! tests and the `crdt-mesh` simulator. Delivery is synchronous: a send
//! publishes the event to the receiver's subscribers before it returns.
//!
//! ```
//! use crdt_net::{NetworkEvent, NetworkInterface, SimNetwork};
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! let net = SimNetwork::new();
//! let mut a = net.join();
//! let mut b = net.join();
//!
//! let received = Rc::new(RefCell::new(Vec::new()));
//! let sink = Rc::clone(&received);
//! b.subscribe(Box::new(move |event| {
//!     if let NetworkEvent::Data { payload, .. } = event {
//!         sink.borrow_mut().push(payload.clone());
//!     }
//! }));
//!
//! let link = a.connect_to(b.id()).unwrap();
//! a.send(&link, b"ping").unwrap();
//! assert_eq!(received.borrow().as_slice(), &[b"ping".to_vec()]);
//! ```

#![warn(missing_docs)]

mod interface;
mod sim;

pub use interface::{
    BroadcastOptions, Connection, Listener, NetError, NetworkEvent, NetworkInterface, NodeId,
};
pub use sim::{SimInterface, SimNetwork, Transmission};
