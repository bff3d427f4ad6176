//! Change records: the serializable unit of replication.

use core::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::Stamp;

/// Identifies one change record: the actor that made it and its local
/// sequence number (starting at 1).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChangeId {
    /// Actor that made the change.
    pub actor: String,
    /// Per-actor sequence number.
    pub seq: u64,
}

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.seq, self.actor)
    }
}

/// A single stamped write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Op {
    /// Set `key` to `value`.
    Put {
        /// Field name.
        key: String,
        /// New value.
        value: Value,
        /// Write timestamp.
        stamp: Stamp,
    },
    /// Remove `key`. Leaves a tombstone so older puts cannot resurrect it.
    Delete {
        /// Field name.
        key: String,
        /// Write timestamp.
        stamp: Stamp,
    },
}

impl Op {
    /// The field this op writes.
    pub fn key(&self) -> &str {
        match self {
            Self::Put { key, .. } | Self::Delete { key, .. } => key,
        }
    }

    /// The op's timestamp.
    pub fn stamp(&self) -> &Stamp {
        match self {
            Self::Put { stamp, .. } | Self::Delete { stamp, .. } => stamp,
        }
    }
}

/// One local edit, as exported to other replicas.
///
/// Applying a change is idempotent: a replica remembers every [`ChangeId`]
/// it has applied and skips repeats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    /// Unique id of this change.
    pub id: ChangeId,
    /// Writes made by the edit, in the order they were made.
    pub ops: Vec<Op>,
}

impl Change {
    /// Highest Lamport counter among the ops, or zero for an empty change.
    pub fn max_counter(&self) -> u64 {
        self.ops.iter().map(|op| op.stamp().counter).max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn op_accessors() {
        let put = Op::Put {
            key: "k".into(),
            value: json!(1),
            stamp: Stamp::new(4, "a"),
        };
        let del = Op::Delete {
            key: "j".into(),
            stamp: Stamp::new(9, "b"),
        };
        assert_eq!(put.key(), "k");
        assert_eq!(del.key(), "j");
        assert_eq!(del.stamp().counter, 9);
    }

    #[test]
    fn max_counter_over_ops() {
        let change = Change {
            id: ChangeId {
                actor: "a".into(),
                seq: 1,
            },
            ops: vec![
                Op::Delete {
                    key: "x".into(),
                    stamp: Stamp::new(3, "a"),
                },
                Op::Delete {
                    key: "y".into(),
                    stamp: Stamp::new(5, "a"),
                },
            ],
        };
        assert_eq!(change.max_counter(), 5);
    }

    #[test]
    fn json_shape_is_tagged() {
        let op = Op::Delete {
            key: "x".into(),
            stamp: Stamp::new(1, "a"),
        };
        let v = serde_json::to_value(&op).unwrap();
        assert_eq!(v["op"], "delete");
        assert_eq!(v["stamp"]["actor"], "a");
    }

    #[test]
    fn change_id_display() {
        let id = ChangeId {
            actor: "node-1".into(),
            seq: 3,
        };
        assert_eq!(id.to_string(), "3@node-1");
    }
}
