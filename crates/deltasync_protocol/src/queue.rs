//! Ordered queue of pending deltas.

use crate::delta::{Delta, DeltaId};
use std::collections::{HashSet, VecDeque};

/// FIFO queue of deltas waiting for an executor.
///
/// The queue maintains:
/// - Pending deltas in enqueue order
/// - The next sequence number to assign
///
/// # Invariants
///
/// - Sequence numbers strictly increase along the queue
/// - Removing deltas never reorders the remaining ones
/// - Per-identifier order is therefore the enqueue order
#[derive(Debug, Clone)]
pub struct DeltaQueue {
    entries: VecDeque<Delta>,
    next_sequence: u64,
}

impl DeltaQueue {
    /// Creates a new empty queue.
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            next_sequence: 1,
        }
    }

    /// Rebuilds a queue from persisted deltas.
    ///
    /// Deltas keep their recorded sequences; they are re-sorted by sequence
    /// and the next sequence continues after the highest one.
    pub fn restore(deltas: impl IntoIterator<Item = Delta>) -> Self {
        let mut entries: Vec<Delta> = deltas.into_iter().collect();
        entries.sort_by_key(|d| d.sequence);
        let next_sequence = entries.last().map_or(1, |d| d.sequence + 1);
        Self {
            entries: entries.into(),
            next_sequence,
        }
    }

    /// Appends a delta, assigning its sequence number.
    ///
    /// Returns the assigned sequence.
    pub fn push(&mut self, mut delta: Delta) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        delta.sequence = sequence;
        self.entries.push_back(delta);
        sequence
    }

    /// Appends a delta, first removing an earlier duplicate of it.
    ///
    /// The new delta takes the tail position. Returns the assigned sequence
    /// and the delta that was collapsed, if any.
    pub fn push_collapsing(&mut self, delta: Delta) -> (u64, Option<Delta>) {
        let collapsed = self
            .entries
            .iter()
            .position(|existing| existing.is_duplicate_of(&delta))
            .and_then(|pos| self.entries.remove(pos));
        (self.push(delta), collapsed)
    }

    /// Removes the given deltas, returning how many were present.
    pub fn remove(&mut self, ids: &HashSet<DeltaId>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|d| !ids.contains(&d.delta_id));
        before - self.entries.len()
    }

    /// Pending deltas in enqueue order.
    pub fn pending(&self) -> impl Iterator<Item = &Delta> {
        self.entries.iter()
    }

    /// Copies the pending deltas.
    pub fn snapshot(&self) -> Vec<Delta> {
        self.entries.iter().cloned().collect()
    }

    /// Pending deltas for one identifier, in enqueue order.
    pub fn iter_identifier<'a>(&'a self, identifier: &'a str) -> impl Iterator<Item = &'a Delta> {
        self.entries.iter().filter(move |d| d.identifier == identifier)
    }

    /// Returns true if the delta is still queued.
    pub fn contains(&self, id: &DeltaId) -> bool {
        self.entries.iter().any(|d| &d.delta_id == id)
    }

    /// Returns the next sequence number.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Returns the number of pending deltas.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for DeltaQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_delta(identifier: &str, property: &str, value: i64) -> Delta {
        Delta::new(identifier, "user", property, value)
    }

    #[test]
    fn push_assigns_sequences() {
        let mut queue = DeltaQueue::new();

        assert_eq!(queue.push(make_delta("u1", "a", 1)), 1);
        assert_eq!(queue.push(make_delta("u1", "b", 1)), 2);
        assert_eq!(queue.push(make_delta("u2", "a", 1)), 3);

        let sequences: Vec<_> = queue.pending().map(|d| d.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
    }

    #[test]
    fn remove_keeps_order() {
        let mut queue = DeltaQueue::new();
        let deltas: Vec<_> = (0..5).map(|i| make_delta("u1", "p", i)).collect();
        for d in &deltas {
            queue.push(d.clone());
        }

        let ids: HashSet<_> = [deltas[1].delta_id, deltas[3].delta_id].into();
        assert_eq!(queue.remove(&ids), 2);

        let values: Vec<_> = queue.pending().map(|d| d.value.as_integer().unwrap()).collect();
        assert_eq!(values, vec![0, 2, 4]);
    }

    #[test]
    fn collapsing_moves_latest_to_tail() {
        let mut queue = DeltaQueue::new();
        queue.push(make_delta("u1", "tag", 1));
        queue.push(make_delta("u1", "other", 9));

        let (seq, collapsed) = queue.push_collapsing(make_delta("u1", "tag", 1));
        assert_eq!(seq, 3);
        assert_eq!(collapsed.unwrap().sequence, 1);

        let props: Vec<_> = queue.pending().map(|d| d.property.as_str()).collect();
        assert_eq!(props, vec!["other", "tag"]);
    }

    #[test]
    fn collapsing_ignores_different_values() {
        let mut queue = DeltaQueue::new();
        queue.push(make_delta("u1", "tag", 1));
        let (_, collapsed) = queue.push_collapsing(make_delta("u1", "tag", 2));
        assert!(collapsed.is_none());
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn restore_continues_sequence() {
        let mut a = make_delta("u1", "a", 1);
        a.sequence = 4;
        let mut b = make_delta("u1", "b", 1);
        b.sequence = 9;

        let mut queue = DeltaQueue::restore(vec![b, a]);
        assert_eq!(queue.pending().next().unwrap().sequence, 4);
        assert_eq!(queue.next_sequence(), 10);
        assert_eq!(queue.push(make_delta("u1", "c", 1)), 10);
    }

    #[test]
    fn iter_identifier_filters() {
        let mut queue = DeltaQueue::new();
        queue.push(make_delta("u1", "a", 1));
        queue.push(make_delta("u2", "a", 1));
        queue.push(make_delta("u1", "b", 1));

        let props: Vec<_> = queue.iter_identifier("u1").map(|d| d.property.clone()).collect();
        assert_eq!(props, vec!["a", "b"]);
    }
}
