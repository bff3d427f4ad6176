//! The synchronization engine.
//!
//! One [`SyncEngine`] owns one replica of the shared document and speaks the
//! session protocol over one [`NetworkInterface`]:
//!
//! - `initSession` carries a session's full history; an uninitialized node
//!   adopts the first one it receives.
//! - `changes` carries one edit; it is merged only within the same session.
//! - `requestSessionInit` asks for the history; an initialized node answers
//!   the requester directly and stops the request there.
//!
//! Everything else is flooded: relayed to every neighbor except the one it
//! came from, once per node, using a log of seen message ids to break cycles.

use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::rc::Rc;

use crdt_doc::{Document, ReplicatedDoc};
use crdt_net::{BroadcastOptions, Connection, NetworkEvent, NetworkInterface, NodeId};
use tracing::{debug, error, info, info_span, warn, Span};

use crate::codec::{self, WireError};
use crate::config::SyncConfig;
use crate::dedup::BroadcastLog;
use crate::error::SyncError;
use crate::message::{Message, MessageId, Payload, SessionId};

/// A document replacement, as seen by [`SyncEngine::on_change`] listeners.
pub struct DocumentChange<'a, D: ReplicatedDoc> {
    /// What differs between `before` and `after`.
    pub patches: Vec<D::Patch>,
    /// The snapshot that was replaced.
    pub before: &'a D,
    /// The new snapshot.
    pub after: &'a D,
}

/// A document-change listener.
pub type ChangeListener<D> = Box<dyn FnMut(&DocumentChange<'_, D>)>;

enum SessionState<D> {
    Uninitialized,
    Initialized { session_id: SessionId, document: D },
}

/// Keeps one shared document in sync with every node reachable over the mesh.
///
/// Network events are queued as they arrive and handled, in arrival order,
/// by [`process_pending`](Self::process_pending).
///
/// # Example
///
/// ```
/// use crdt_net::SimNetwork;
/// use crdt_sync::SyncEngine;
///
/// let net = SimNetwork::new();
/// let mut a = SyncEngine::new(net.join());
/// let mut b = SyncEngine::new(net.join());
/// let b_id = b.id().clone();
/// a.connect(&b_id).unwrap();
///
/// a.init_shared_data(|d| d.put("message", "hello")).unwrap();
/// while a.process_pending() + b.process_pending() > 0 {}
///
/// let doc = b.shared_data().unwrap();
/// assert_eq!(doc.get_str("message"), Some("hello"));
/// ```
pub struct SyncEngine<N: NetworkInterface, D: ReplicatedDoc = Document> {
    network: N,
    config: SyncConfig,
    state: SessionState<D>,
    broadcast_log: BroadcastLog,
    answered: HashSet<MessageId>,
    inbox: Rc<RefCell<VecDeque<NetworkEvent>>>,
    listeners: Vec<ChangeListener<D>>,
    span: Span,
}

/// Builder for a [`SyncEngine`] with non-default configuration.
pub struct SyncEngineBuilder<N: NetworkInterface, D: ReplicatedDoc = Document> {
    network: N,
    config: SyncConfig,
    _doc: core::marker::PhantomData<D>,
}

impl<N: NetworkInterface, D: ReplicatedDoc> SyncEngineBuilder<N, D> {
    /// Whether to ask each newly connected peer for the session.
    pub fn request_on_connect(mut self, enabled: bool) -> Self {
        self.config.request_on_connect = enabled;
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Subscribe to the network and build the engine.
    pub fn build(self) -> SyncEngine<N, D> {
        let mut network = self.network;
        let inbox = Rc::new(RefCell::new(VecDeque::new()));

        let sink = Rc::clone(&inbox);
        network.subscribe(Box::new(move |event: &NetworkEvent| {
            sink.borrow_mut().push_back(event.clone());
        }));

        let span = info_span!("sync_engine", node = %network.id());
        SyncEngine {
            network,
            config: self.config,
            state: SessionState::Uninitialized,
            broadcast_log: BroadcastLog::new(),
            answered: HashSet::new(),
            inbox,
            listeners: Vec::new(),
            span,
        }
    }
}

impl<N: NetworkInterface> SyncEngine<N, Document> {
    /// Create an engine over `network` with the default document type and
    /// configuration.
    pub fn new(network: N) -> Self {
        Self::builder(network).build()
    }
}

impl<N: NetworkInterface, D: ReplicatedDoc> SyncEngine<N, D> {
    /// Start building an engine over `network`.
    pub fn builder(network: N) -> SyncEngineBuilder<N, D> {
        SyncEngineBuilder {
            network,
            config: SyncConfig::default(),
            _doc: core::marker::PhantomData,
        }
    }

    /// This node's id.
    pub fn id(&self) -> &NodeId {
        self.network.id()
    }

    /// The network interface.
    pub fn network(&self) -> &N {
        &self.network
    }

    /// The network interface, mutably.
    pub fn network_mut(&mut self) -> &mut N {
        &mut self.network
    }

    /// The active configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Whether this node holds a session.
    pub fn is_initialized(&self) -> bool {
        matches!(self.state, SessionState::Initialized { .. })
    }

    /// The current session id.
    pub fn session_id(&self) -> Option<&SessionId> {
        match &self.state {
            SessionState::Initialized { session_id, .. } => Some(session_id),
            SessionState::Uninitialized => None,
        }
    }

    /// The current document snapshot.
    pub fn shared_data(&self) -> Option<&D> {
        match &self.state {
            SessionState::Initialized { document, .. } => Some(document),
            SessionState::Uninitialized => None,
        }
    }

    /// Number of distinct message ids this node has flooded or sent.
    pub fn seen_message_count(&self) -> usize {
        self.broadcast_log.len()
    }

    /// Number of network events waiting for [`process_pending`](Self::process_pending).
    pub fn pending_events(&self) -> usize {
        self.inbox.borrow().len()
    }

    /// Open a direct link to `peer`.
    pub fn connect(&mut self, peer: &NodeId) -> Result<Connection, SyncError> {
        Ok(self.network.connect_to(peer)?)
    }

    /// Register a listener called after every document replacement.
    ///
    /// Listeners run synchronously and must not call back into the engine.
    pub fn on_change<F>(&mut self, listener: F)
    where
        F: FnMut(&DocumentChange<'_, D>) + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    /// Start a new session with `mutator` as the document's first edit, and
    /// announce it to every peer.
    ///
    /// Fails with [`SyncError::AlreadyInitialized`] if a session exists; the
    /// existing session is left untouched.
    pub fn init_shared_data<F>(&mut self, mutator: F) -> Result<SessionId, SyncError>
    where
        F: FnOnce(&mut D::Draft),
    {
        let span = self.span.clone();
        let _enter = span.enter();

        if self.is_initialized() {
            return Err(SyncError::AlreadyInitialized);
        }

        let session_id = SessionId::generate();
        let empty = D::init(self.id().as_str());
        let binding = session_id.clone();
        let document = empty
            .change(|draft| {
                mutator(draft);
                D::bind_session(draft, binding.as_str());
            })
            .unwrap_or_else(|| empty.clone());

        Self::notify(&mut self.listeners, &empty, &document);
        let shared_data = document.all_changes();
        self.state = SessionState::Initialized {
            session_id: session_id.clone(),
            document,
        };
        info!(session = %session_id, "session initialized");

        self.broadcast_message(Message::new(Payload::InitSession { shared_data }), None)?;
        Ok(session_id)
    }

    /// Ask every peer for the session. Fails with
    /// [`SyncError::AlreadyInitialized`] if this node already has one.
    pub fn request_shared_data_sync(&mut self) -> Result<(), SyncError> {
        let span = self.span.clone();
        let _enter = span.enter();

        if self.is_initialized() {
            return Err(SyncError::AlreadyInitialized);
        }
        self.broadcast_message(Message::new(Payload::RequestSessionInit), None)?;
        Ok(())
    }

    /// Apply a local edit and send it to every peer.
    ///
    /// Fails with [`SyncError::NotInitialized`] before a session exists. A
    /// mutator that makes no edit changes nothing and sends nothing.
    pub fn update_data<F>(&mut self, mutator: F) -> Result<(), SyncError>
    where
        F: FnOnce(&mut D::Draft),
    {
        let span = self.span.clone();
        let _enter = span.enter();

        let next = match &self.state {
            SessionState::Initialized { document, .. } => document.change(mutator),
            SessionState::Uninitialized => return Err(SyncError::NotInitialized),
        };
        let Some(next) = next else {
            debug!("mutator made no edit");
            return Ok(());
        };

        let change = next.last_local_change().cloned();
        self.replace_document(next);

        match change {
            Some(changes) => {
                self.broadcast_message(Message::new(Payload::Changes { changes }), None)?;
            }
            None => error!("document produced no local change record"),
        }
        Ok(())
    }

    /// Handle every queued network event. Returns how many were handled.
    pub fn process_pending(&mut self) -> usize {
        let span = self.span.clone();
        let _enter = span.enter();

        let mut handled = 0;
        loop {
            let next = self.inbox.borrow_mut().pop_front();
            let Some(event) = next else {
                break;
            };
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    /// Release the network interface and drop all state and listeners.
    pub fn cleanup(mut self) {
        let span = self.span.clone();
        let _enter = span.enter();

        self.network.cleanup();
        self.listeners.clear();
        self.inbox.borrow_mut().clear();
        self.state = SessionState::Uninitialized;
        info!("engine cleaned up");
    }

    fn handle_event(&mut self, event: NetworkEvent) {
        match event {
            NetworkEvent::ConnectionOpen(connection) => {
                debug!(peer = %connection.id(), "connection open");
                if !self.is_initialized() && self.config.request_on_connect {
                    self.send_message_to(&connection, Message::new(Payload::RequestSessionInit));
                }
            }
            NetworkEvent::Data {
                connection,
                payload,
            } => self.handle_data(&connection, &payload),
        }
    }

    fn handle_data(&mut self, connection: &Connection, payload: &[u8]) {
        let message = match codec::decode::<D::Change>(payload) {
            Ok(Some(message)) => message,
            Ok(None) => {
                debug!(from = %connection.id(), "ignoring payload that is not a message");
                return;
            }
            Err(e) => {
                warn!(from = %connection.id(), error = %e, "dropping undecodable message");
                return;
            }
        };

        debug!(
            from = %connection.id(),
            kind = message.kind(),
            msg_id = ?message.msg_id.as_ref().map(MessageId::as_str),
            "received"
        );

        // Requests skip this so a node that relayed one while uninitialized
        // can still answer a later copy.
        let is_request = matches!(message.payload, Payload::RequestSessionInit);
        if let Some(msg_id) = &message.msg_id {
            if !is_request && self.broadcast_log.has_seen(msg_id) {
                debug!(msg_id = %msg_id, "duplicate, dropping");
                return;
            }
        }

        let mut should_relay = true;

        match &message.payload {
            Payload::InitSession { shared_data } => {
                self.accept_session(message.session_id.as_ref(), shared_data);
            }
            Payload::Changes { changes } => {
                self.accept_changes(message.session_id.as_ref(), changes);
            }
            Payload::RequestSessionInit => {
                let history = self.shared_data().map(ReplicatedDoc::all_changes);
                self.answer_request(&message, connection, history, &mut should_relay);
            }
            Payload::Unrecognized { kind, .. } => {
                debug!(kind = kind.as_str(), "unrecognized message type");
            }
        }

        if should_relay {
            if let Err(e) = self.broadcast_message(message, Some(connection.id())) {
                warn!(error = %e, "failed to relay message");
            }
        }
    }

    fn answer_request(
        &mut self,
        message: &Message<D::Change>,
        connection: &Connection,
        history: Option<Vec<D::Change>>,
        should_relay: &mut bool,
    ) {
        let Some(shared_data) = history else {
            debug!("no session to answer with, relaying request");
            return;
        };
        *should_relay = false;

        let own = message.origin_id.as_ref() == Some(self.id());
        let first = match &message.msg_id {
            Some(msg_id) => self.answered.insert(msg_id.clone()),
            None => true,
        };
        if own || !first {
            debug!("request already answered or our own, dropping");
            return;
        }

        debug!(to = %connection.id(), "answering session request");
        self.send_message_to(connection, Message::new(Payload::InitSession { shared_data }));
    }

    fn accept_session(&mut self, session_id: Option<&SessionId>, shared_data: &[D::Change]) {
        if let SessionState::Initialized {
            session_id: current,
            ..
        } = &self.state
        {
            warn!(
                current = %current,
                offered = ?session_id.map(SessionId::as_str),
                "already initialized, ignoring initSession"
            );
            return;
        }

        let empty = D::init(self.id().as_str());
        let document = empty
            .apply_changes(shared_data.to_vec())
            .unwrap_or_else(|| empty.clone());

        let session_id = session_id
            .cloned()
            .or_else(|| document.bound_session().map(SessionId::from));
        let Some(session_id) = session_id else {
            warn!("initSession carries no session id, ignoring");
            return;
        };

        Self::notify(&mut self.listeners, &empty, &document);
        info!(session = %session_id, records = shared_data.len(), "adopted session");
        self.state = SessionState::Initialized {
            session_id,
            document,
        };
    }

    fn accept_changes(&mut self, session_id: Option<&SessionId>, changes: &D::Change) {
        let next = match &self.state {
            SessionState::Initialized {
                session_id: current,
                document,
            } => {
                if session_id != Some(current) {
                    warn!(
                        expected = %current,
                        got = ?session_id.map(SessionId::as_str),
                        "wrong session id, ignoring changes"
                    );
                    return;
                }
                document.apply_changes(vec![changes.clone()])
            }
            SessionState::Uninitialized => {
                warn!("not initialized, ignoring changes");
                return;
            }
        };

        match next {
            Some(next) => {
                debug!("merged remote changes");
                self.replace_document(next);
            }
            None => debug!("changes already applied"),
        }
    }

    fn replace_document(&mut self, next: D) {
        if let SessionState::Initialized { document, .. } = &mut self.state {
            let before = std::mem::replace(document, next);
            Self::notify(&mut self.listeners, &before, document);
        }
    }

    fn notify(listeners: &mut [ChangeListener<D>], before: &D, after: &D) {
        if listeners.is_empty() {
            return;
        }
        let change = DocumentChange {
            patches: before.diff(after),
            before,
            after,
        };
        for listener in listeners.iter_mut() {
            listener(&change);
        }
    }

    /// Flood `message` to every peer except the one it arrived from.
    ///
    /// Locally created messages get a fresh id and this node as origin;
    /// relayed messages keep theirs. A message id broadcast before is
    /// dropped.
    fn broadcast_message(
        &mut self,
        mut message: Message<D::Change>,
        arrived_from: Option<&NodeId>,
    ) -> Result<(), WireError> {
        if let Some(msg_id) = &message.msg_id {
            if self.broadcast_log.has_seen(msg_id) {
                debug!(msg_id = %msg_id, "already broadcast, dropping");
                return Ok(());
            }
        }

        let msg_id = message.msg_id.take().unwrap_or_else(MessageId::generate);
        let origin_id = message
            .origin_id
            .take()
            .unwrap_or_else(|| self.id().clone());

        self.broadcast_log.check_and_mark(&msg_id);
        message.relay = origin_id != *self.id();
        if message.session_id.is_none() {
            message.session_id = self.session_id().cloned();
        }

        debug!(
            kind = message.kind(),
            msg_id = %msg_id,
            origin = %origin_id,
            relay = message.relay,
            "broadcast"
        );
        message.msg_id = Some(msg_id);
        message.origin_id = Some(origin_id);

        let bytes = codec::encode(&message)?;
        let options = arrived_from
            .map(BroadcastOptions::excluding)
            .unwrap_or_default();
        self.network.broadcast(&bytes, &options);
        Ok(())
    }

    /// Send a locally created message to one peer, outside the flood.
    ///
    /// The id is logged so the message is dropped if a cycle brings it back.
    fn send_message_to(&mut self, connection: &Connection, mut message: Message<D::Change>) {
        let msg_id = MessageId::generate();
        self.broadcast_log.check_and_mark(&msg_id);
        message.session_id = self.session_id().cloned();
        message.msg_id = Some(msg_id);
        message.origin_id = Some(self.id().clone());
        message.relay = false;

        let bytes = match codec::encode(&message) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "failed to encode direct message");
                return;
            }
        };
        if let Err(e) = self.network.send(connection, &bytes) {
            warn!(to = %connection.id(), error = %e, "direct send failed");
        }
    }
}
