//! Protocol messages.
//!
//! A message is a header (session, origin, message id, relay flag) plus one
//! of the payloads below. The change record type `C` is supplied by the
//! replicated document in use.

use core::fmt;

use crdt_net::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Wire tag of [`Payload::RequestSessionInit`].
pub const REQUEST_SESSION_INIT: &str = "requestSessionInit";
/// Wire tag of [`Payload::InitSession`].
pub const INIT_SESSION: &str = "initSession";
/// Wire tag of [`Payload::Changes`].
pub const CHANGES: &str = "changes";

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// A fresh random (UUID v4) id.
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// The id as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id! {
    /// Identifies one shared-document session.
    SessionId
}

string_id! {
    /// Identifies one logical message across every relay hop.
    MessageId
}

/// Message type, as named on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum MessageKind {
    /// `requestSessionInit`
    RequestSessionInit,
    /// `initSession`
    InitSession,
    /// `changes`
    Changes,
    /// Any other tag.
    Unrecognized,
}

impl MessageKind {
    /// Classify a wire tag.
    pub(crate) fn from_tag(tag: &str) -> Self {
        match tag {
            REQUEST_SESSION_INIT => Self::RequestSessionInit,
            INIT_SESSION => Self::InitSession,
            CHANGES => Self::Changes,
            _ => Self::Unrecognized,
        }
    }
}

/// Message body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload<C> {
    /// Ask any initialized peer for the session.
    RequestSessionInit,
    /// The full change history of a session.
    InitSession {
        /// Records that rebuild the document from empty.
        shared_data: Vec<C>,
    },
    /// One incremental edit.
    Changes {
        /// The edit's change record.
        changes: C,
    },
    /// A type this node does not understand. Kept whole so it can be relayed.
    Unrecognized {
        /// The wire tag.
        kind: String,
        /// Every non-header field, untouched.
        fields: Map<String, Value>,
    },
}

/// A protocol message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message<C> {
    /// Session the message belongs to.
    pub session_id: Option<SessionId>,
    /// Node that created the message.
    pub origin_id: Option<NodeId>,
    /// Id shared by every copy of the message.
    pub msg_id: Option<MessageId>,
    /// Whether the transmitting node is someone other than the origin.
    pub relay: bool,
    /// Body.
    pub payload: Payload<C>,
}

impl<C> Message<C> {
    /// A message with an empty header.
    pub fn new(payload: Payload<C>) -> Self {
        Self {
            session_id: None,
            origin_id: None,
            msg_id: None,
            relay: false,
            payload,
        }
    }

    /// The wire tag of this message.
    pub fn kind(&self) -> &str {
        match &self.payload {
            Payload::RequestSessionInit => REQUEST_SESSION_INIT,
            Payload::InitSession { .. } => INIT_SESSION,
            Payload::Changes { .. } => CHANGES,
            Payload::Unrecognized { kind, .. } => kind.as_str(),
        }
    }
}
