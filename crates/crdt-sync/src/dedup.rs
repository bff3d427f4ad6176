use std::collections::HashSet;

use crate::message::MessageId;

/// Ids of every message this node has broadcast or sent directly.
///
/// Never pruned: an id stays for the life of the engine, so a message that
/// loops back through a cycle is always recognized.
#[derive(Debug, Default)]
pub(crate) struct BroadcastLog {
    seen: HashSet<MessageId>,
}

impl BroadcastLog {
    /// Create an empty log.
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record `id`. Returns true if it was not recorded before.
    pub(crate) fn check_and_mark(&mut self, id: &MessageId) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        self.seen.insert(id.clone())
    }

    /// Whether `id` has been recorded.
    pub(crate) fn has_seen(&self, id: &MessageId) -> bool {
        self.seen.contains(id)
    }

    /// Number of recorded ids.
    pub(crate) fn len(&self) -> usize {
        self.seen.len()
    }
}
