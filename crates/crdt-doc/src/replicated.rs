//! The replicated-document capability consumed by the sync engine.

use core::fmt;

use serde::{de::DeserializeOwned, Serialize};

/// A document type whose edits can be exported as change records and merged
/// on any replica, in any order, with the same result.
///
/// Snapshots are immutable: every operation that modifies the document
/// returns a new value and leaves `self` untouched.
///
/// # Example
///
/// ```
/// use crdt_doc::{Document, ReplicatedDoc};
///
/// let a = Document::init("a");
/// let a = a.change(|d| d.put("title", "draft")).unwrap();
///
/// let b = Document::init("b").apply_changes(a.all_changes()).unwrap();
/// assert_eq!(b.get_str("title"), Some("draft"));
/// ```
pub trait ReplicatedDoc: Clone {
    /// Serializable record of one edit.
    type Change: Clone + fmt::Debug + Serialize + DeserializeOwned;
    /// Mutable staging area handed to mutators.
    type Draft;
    /// One entry of the difference between two snapshots.
    type Patch: Clone + fmt::Debug;

    /// An empty document owned by `actor`.
    fn init(actor: &str) -> Self;

    /// Apply a local edit.
    ///
    /// Returns `None` when the mutator made no edit.
    fn change<F>(&self, mutator: F) -> Option<Self>
    where
        F: FnOnce(&mut Self::Draft);

    /// Merge remote change records.
    ///
    /// Returns `None` when every record was already known.
    fn apply_changes(&self, changes: Vec<Self::Change>) -> Option<Self>;

    /// Every change record needed to rebuild this document from empty.
    fn all_changes(&self) -> Vec<Self::Change>;

    /// The record produced by the most recent local [`change`](Self::change).
    fn last_local_change(&self) -> Option<&Self::Change>;

    /// Differences from `self` to `newer`.
    fn diff(&self, newer: &Self) -> Vec<Self::Patch>;

    /// Record a session id inside the edit so it travels with the history.
    fn bind_session(draft: &mut Self::Draft, session_id: &str);

    /// The session id recorded by [`bind_session`](Self::bind_session), if any.
    fn bound_session(&self) -> Option<&str>;
}
