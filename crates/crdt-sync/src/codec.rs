//! JSON wire encoding of [`Message`]s.
//!
//! Every message is one JSON object with camelCase keys:
//!
//! ```text
//! {"type": "changes", "sessionId": "...", "originId": "3", "msgId": "...",
//!  "relay": true, "changes": { ... }}
//! ```
//!
//! A payload that is not an object with a string `type` is not a message.
//! Unknown types decode to [`Payload::Unrecognized`] with every other field
//! kept, so relaying them loses nothing.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::message::{Message, MessageKind, Payload};

const TYPE: &str = "type";
const SESSION_ID: &str = "sessionId";
const ORIGIN_ID: &str = "originId";
const MSG_ID: &str = "msgId";
const RELAY: &str = "relay";
const SHARED_DATA: &str = "sharedData";
const CHANGES: &str = "changes";

/// Error encoding or decoding a wire message.
#[derive(Debug, Error)]
pub enum WireError {
    /// The bytes are not valid JSON, or a record failed to serialize.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// A known message type whose body does not decode.
    #[error("malformed {kind} message: {source}")]
    Malformed {
        /// The message's wire tag.
        kind: String,
        /// Underlying decode error.
        source: serde_json::Error,
    },
}

/// Encode a message.
pub fn encode<C: Serialize>(message: &Message<C>) -> Result<Vec<u8>, WireError> {
    let mut obj = Map::new();

    match &message.payload {
        Payload::RequestSessionInit => {}
        Payload::InitSession { shared_data } => {
            obj.insert(SHARED_DATA.into(), serde_json::to_value(shared_data)?);
        }
        Payload::Changes { changes } => {
            obj.insert(CHANGES.into(), serde_json::to_value(changes)?);
        }
        Payload::Unrecognized { fields, .. } => {
            obj.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
    }

    obj.insert(TYPE.into(), Value::String(message.kind().to_string()));
    if let Some(session_id) = &message.session_id {
        obj.insert(SESSION_ID.into(), Value::String(session_id.to_string()));
    }
    if let Some(origin_id) = &message.origin_id {
        obj.insert(ORIGIN_ID.into(), Value::String(origin_id.to_string()));
    }
    if let Some(msg_id) = &message.msg_id {
        obj.insert(MSG_ID.into(), Value::String(msg_id.to_string()));
    }
    obj.insert(RELAY.into(), Value::Bool(message.relay));

    Ok(serde_json::to_vec(&Value::Object(obj))?)
}

/// Decode a message.
///
/// Returns `Ok(None)` for JSON that is not a message.
pub fn decode<C: DeserializeOwned>(bytes: &[u8]) -> Result<Option<Message<C>>, WireError> {
    let Value::Object(mut obj) = serde_json::from_slice::<Value>(bytes)? else {
        return Ok(None);
    };
    let kind = match obj.remove(TYPE) {
        Some(Value::String(kind)) => kind,
        _ => return Ok(None),
    };

    let session_id = take_string(&mut obj, SESSION_ID).map(Into::into);
    let origin_id = take_string(&mut obj, ORIGIN_ID).map(Into::into);
    let msg_id = take_string(&mut obj, MSG_ID).map(Into::into);
    let relay = matches!(obj.remove(RELAY), Some(Value::Bool(true)));

    let payload = match MessageKind::from_tag(&kind) {
        MessageKind::RequestSessionInit => Payload::RequestSessionInit,
        MessageKind::InitSession => Payload::InitSession {
            shared_data: take_body(&mut obj, SHARED_DATA, &kind)?,
        },
        MessageKind::Changes => Payload::Changes {
            changes: take_body(&mut obj, CHANGES, &kind)?,
        },
        MessageKind::Unrecognized => Payload::Unrecognized { kind, fields: obj },
    };

    Ok(Some(Message {
        session_id,
        origin_id,
        msg_id,
        relay,
        payload,
    }))
}

fn take_string(obj: &mut Map<String, Value>, key: &str) -> Option<String> {
    match obj.remove(key) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

fn take_body<T: DeserializeOwned>(
    obj: &mut Map<String, Value>,
    key: &str,
    kind: &str,
) -> Result<T, WireError> {
    let value = obj.remove(key).unwrap_or(Value::Null);
    serde_json::from_value(value).map_err(|source| WireError::Malformed {
        kind: kind.to_string(),
        source,
    })
}
