use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};

use crate::change::{Change, ChangeId, Op};
use crate::clock::{LamportClock, Stamp};
use crate::replicated::ReplicatedDoc;

/// Field that holds the session binding: `{"sessionId": "<id>"}`.
pub const SESSION_KEY: &str = "__";

const SESSION_ID_FIELD: &str = "sessionId";

/// A replicated JSON map.
///
/// Each field is a last-writer-wins register ordered by Lamport [`Stamp`]s.
/// Deletes leave tombstones, so a concurrent older write can never bring a
/// deleted field back. Every local edit becomes a [`Change`] that other
/// replicas merge with [`ReplicatedDoc::apply_changes`].
///
/// # Example
///
/// ```
/// use crdt_doc::{Document, ReplicatedDoc};
///
/// let a = Document::init("a").change(|d| d.put("message", "from a")).unwrap();
/// let b = Document::init("b").apply_changes(a.all_changes()).unwrap();
///
/// // b's edit has seen a's, so it wins everywhere
/// let b = b.change(|d| d.put("message", "from b")).unwrap();
/// let change = b.last_local_change().cloned().unwrap();
/// let a = a.apply_changes(vec![change]).unwrap();
///
/// assert_eq!(a.get_str("message"), Some("from b"));
/// assert_eq!(a, b);
/// ```
#[derive(Debug, Clone)]
pub struct Document {
    clock: LamportClock,
    seq: u64,
    fields: BTreeMap<String, Register>,
    history: Vec<Change>,
    applied: BTreeSet<ChangeId>,
    /// Index into `history` of the latest local change.
    last_local: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
struct Register {
    /// `None` is a tombstone.
    value: Option<Value>,
    stamp: Stamp,
}

/// Staging area for one local edit.
///
/// Reads see the document as it was plus the edits made so far in this draft.
#[derive(Debug, Clone)]
pub struct Draft {
    view: BTreeMap<String, Value>,
    pending: Vec<PendingOp>,
}

#[derive(Debug, Clone)]
enum PendingOp {
    Put(String, Value),
    Delete(String),
}

/// One field that differs between two snapshots.
#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    /// Field name.
    pub key: String,
    /// Value in the older snapshot, `None` if absent.
    pub before: Option<Value>,
    /// Value in the newer snapshot, `None` if absent.
    pub after: Option<Value>,
}

impl Draft {
    /// Current value of a field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.view.get(key)
    }

    /// Whether the field is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.view.contains_key(key)
    }

    /// Field names, in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.view.keys().map(String::as_str)
    }

    /// Set a field.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        self.view.insert(key.clone(), value.clone());
        self.pending.push(PendingOp::Put(key, value));
    }

    /// Remove a field. Removing an absent field is not an edit.
    pub fn delete(&mut self, key: &str) {
        if self.view.remove(key).is_some() {
            self.pending.push(PendingOp::Delete(key.to_string()));
        }
    }

    /// Whether this draft holds any edit.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Document {
    /// Actor that stamps this replica's local edits.
    pub fn actor(&self) -> &str {
        self.clock.actor()
    }

    /// Current value of a field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key).and_then(|r| r.value.as_ref())
    }

    /// Current value of a field, if it is a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Whether the field is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Present fields in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields
            .iter()
            .filter_map(|(k, r)| r.value.as_ref().map(|v| (k.as_str(), v)))
    }

    /// Number of present fields.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Whether no field is present.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of change records this replica has applied.
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Whether a change record has already been applied.
    pub fn has_change(&self, id: &ChangeId) -> bool {
        self.applied.contains(id)
    }

    /// The present fields as a JSON object.
    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        Value::Object(map)
    }

    fn draft(&self) -> Draft {
        Draft {
            view: self
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            pending: Vec::new(),
        }
    }

    fn apply_op(&mut self, op: &Op) {
        self.clock.observe(op.stamp());

        let incoming = match op {
            Op::Put { value, stamp, .. } => Register {
                value: Some(value.clone()),
                stamp: stamp.clone(),
            },
            Op::Delete { stamp, .. } => Register {
                value: None,
                stamp: stamp.clone(),
            },
        };

        match self.fields.get(op.key()) {
            Some(current) if current.stamp >= incoming.stamp => {}
            _ => {
                self.fields.insert(op.key().to_string(), incoming);
            }
        }
    }

    /// Apply one change record in place. Returns false if it was known.
    fn integrate(&mut self, change: Change) -> bool {
        if self.applied.contains(&change.id) {
            return false;
        }

        for op in &change.ops {
            self.apply_op(op);
        }

        if change.id.actor == self.actor() {
            self.seq = self.seq.max(change.id.seq);
        }

        self.applied.insert(change.id.clone());
        self.history.push(change);
        true
    }
}

impl PartialEq for Document {
    /// Replicas are equal when every register agrees, regardless of actor or
    /// the order in which changes arrived.
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl ReplicatedDoc for Document {
    type Change = Change;
    type Draft = Draft;
    type Patch = Patch;

    fn init(actor: &str) -> Self {
        Self {
            clock: LamportClock::new(actor),
            seq: 0,
            fields: BTreeMap::new(),
            history: Vec::new(),
            applied: BTreeSet::new(),
            last_local: None,
        }
    }

    fn change<F>(&self, mutator: F) -> Option<Self>
    where
        F: FnOnce(&mut Draft),
    {
        let mut draft = self.draft();
        mutator(&mut draft);
        if draft.is_empty() {
            return None;
        }

        let mut next = self.clone();
        next.seq += 1;

        let ops = draft
            .pending
            .into_iter()
            .map(|pending| {
                let stamp = next.clock.tick();
                match pending {
                    PendingOp::Put(key, value) => Op::Put { key, value, stamp },
                    PendingOp::Delete(key) => Op::Delete { key, stamp },
                }
            })
            .collect();

        let change = Change {
            id: ChangeId {
                actor: next.actor().to_string(),
                seq: next.seq,
            },
            ops,
        };

        next.integrate(change);
        next.last_local = Some(next.history.len() - 1);
        Some(next)
    }

    fn apply_changes(&self, changes: Vec<Change>) -> Option<Self> {
        let mut next = self.clone();
        let mut applied = 0usize;
        for change in changes {
            if next.integrate(change) {
                applied += 1;
            }
        }
        (applied > 0).then_some(next)
    }

    fn all_changes(&self) -> Vec<Change> {
        self.history.clone()
    }

    fn last_local_change(&self) -> Option<&Change> {
        self.last_local.and_then(|i| self.history.get(i))
    }

    fn diff(&self, newer: &Self) -> Vec<Patch> {
        let keys: BTreeSet<&str> = self
            .iter()
            .chain(newer.iter())
            .map(|(k, _)| k)
            .collect();

        keys.into_iter()
            .filter_map(|key| {
                let before = self.get(key);
                let after = newer.get(key);
                (before != after).then(|| Patch {
                    key: key.to_string(),
                    before: before.cloned(),
                    after: after.cloned(),
                })
            })
            .collect()
    }

    fn bind_session(draft: &mut Draft, session_id: &str) {
        let mut binding = Map::new();
        binding.insert(
            SESSION_ID_FIELD.to_string(),
            Value::String(session_id.to_string()),
        );
        draft.put(SESSION_KEY, Value::Object(binding));
    }

    fn bound_session(&self) -> Option<&str> {
        self.get(SESSION_KEY)
            .and_then(|binding| binding.get(SESSION_ID_FIELD))
            .and_then(Value::as_str)
    }
}
