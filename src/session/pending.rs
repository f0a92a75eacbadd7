//! The pending request table (spec §4.5, §4.8).
//!
//! Every outbound request that expects a correlated reply (CALL,
//! SUBSCRIBE, ...) registers a continuation here under its request id.
//! Most entries are one-shot: the first matching reply removes them.
//! A CALL made with `receive_progress` is different — each progressive
//! YIELD produces an intermediate RESULT that must not consume the
//! entry, so the table tracks entry kind and only ever removes a
//! progressive entry once a final, non-progressive RESULT or ERROR
//! arrives.

use std::collections::HashMap;

use crate::ID;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingKind {
    OneShot,
    Progressive,
}

struct PendingEntry<H> {
    kind: PendingKind,
    handler: H,
}

/// A table of in-flight requests keyed by request id, generic over the
/// continuation type `H` (a `CompletionHandler` impl, a raw closure, ...).
pub struct PendingTable<H> {
    entries: HashMap<ID, PendingEntry<H>>,
}

impl<H> PendingTable<H> {
    pub fn new() -> PendingTable<H> {
        PendingTable {
            entries: HashMap::new(),
        }
    }

    pub fn insert(&mut self, id: ID, kind: PendingKind, handler: H) {
        self.entries.insert(id, PendingEntry { kind, handler });
    }

    pub fn contains(&self, id: ID) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn get(&self, id: ID) -> Option<&H> {
        self.entries.get(&id).map(|entry| &entry.handler)
    }

    pub fn get_mut(&mut self, id: ID) -> Option<&mut H> {
        self.entries.get_mut(&id).map(|entry| &mut entry.handler)
    }

    /// Removes and returns the entry unconditionally, regardless of kind.
    /// Used for ERROR replies and outright disconnection, where a
    /// progressive call still terminates on the first error.
    pub fn complete(&mut self, id: ID) -> Option<H> {
        self.entries.remove(&id).map(|entry| entry.handler)
    }

    /// Removes the entry unless it's a progressive call that isn't done
    /// yet. Call on every RESULT; pass whether the RESULT carried
    /// `progress: true`. Returns the handler only while the call is
    /// still pending (a progressive result that isn't the final one);
    /// once the call actually finishes the entry is removed and this
    /// returns `None`.
    pub fn retain_progressive(&mut self, id: ID, progress: bool) -> Option<&H> {
        let done = match self.entries.get(&id) {
            Some(entry) => !(entry.kind == PendingKind::Progressive && progress),
            None => return None,
        };
        if done {
            self.entries.remove(&id);
            None
        } else {
            self.entries.get(&id).map(|entry| &entry.handler)
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drains every pending entry, for use when a session fails or
    /// disconnects and every outstanding request must be resolved.
    pub fn drain(&mut self) -> Vec<(ID, H)> {
        self.entries
            .drain()
            .map(|(id, entry)| (id, entry.handler))
            .collect()
    }
}

impl<H> Default for PendingTable<H> {
    fn default() -> PendingTable<H> {
        PendingTable::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn one_shot_entry_is_removed_on_first_result() {
        let mut table: PendingTable<&'static str> = PendingTable::new();
        table.insert(1, PendingKind::OneShot, "handler");
        assert!(table.retain_progressive(1, false).is_none());
        assert!(!table.contains(1));
    }

    #[test]
    fn progressive_entry_survives_progress_results() {
        let mut table: PendingTable<&'static str> = PendingTable::new();
        table.insert(1, PendingKind::Progressive, "handler");
        assert!(table.retain_progressive(1, true).is_some());
        assert!(table.contains(1));
        assert!(table.retain_progressive(1, true).is_some());
        assert!(table.contains(1));
        assert!(table.retain_progressive(1, false).is_none());
        assert!(!table.contains(1));
    }

    #[test]
    fn complete_removes_regardless_of_kind() {
        let mut table: PendingTable<&'static str> = PendingTable::new();
        table.insert(1, PendingKind::Progressive, "handler");
        assert!(table.complete(1).is_some());
        assert!(!table.contains(1));
    }

    #[test]
    fn drain_empties_the_table() {
        let mut table: PendingTable<&'static str> = PendingTable::new();
        table.insert(1, PendingKind::OneShot, "a");
        table.insert(2, PendingKind::OneShot, "b");
        let drained = table.drain();
        assert_eq!(drained.len(), 2);
        assert!(table.is_empty());
    }
}
