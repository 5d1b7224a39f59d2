#![forbid(unsafe_code)]

//! Backlog reconciliation.
//!
//! A `PendingSet` correlates successive observations of a channel's
//! outstanding packet sequences into an in-flight set with first-seen
//! timestamps. The same routine serves both directions; only the data source
//! differs. Sequence order is authoritative: the oldest entry is the minimum
//! sequence, matching on-chain send-order assignment.

use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Send,
    Ack,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Send => "send",
            Direction::Ack => "ack",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BacklogSnapshot {
    pub size: u64,
    pub oldest_sequence: Option<u64>,
    pub oldest_timestamp: Option<u64>,
}

/// In-flight packets for one (channel, direction), keyed by sequence with the
/// unix time each sequence was first observed.
#[derive(Debug, Clone, Default)]
pub struct PendingSet {
    first_seen: BTreeMap<u64, u64>,
}

impl PendingSet {
    /// Replace the in-flight set with the observed one: entries no longer
    /// observed are resolved and dropped, entries still present keep their
    /// first-seen stamp, new entries are stamped `now`. Duplicate observed
    /// sequences collapse to the earliest-seen stamp rather than failing.
    pub fn reconcile(&mut self, observed: &[u64], now: u64) -> BacklogSnapshot {
        let keep: BTreeSet<u64> = observed.iter().copied().collect();
        self.first_seen.retain(|seq, _| keep.contains(seq));
        for seq in keep {
            self.first_seen.entry(seq).or_insert(now);
        }
        self.snapshot()
    }

    pub fn snapshot(&self) -> BacklogSnapshot {
        let oldest = self.first_seen.iter().next();
        BacklogSnapshot {
            size: self.first_seen.len() as u64,
            oldest_sequence: oldest.map(|(seq, _)| *seq),
            oldest_timestamp: oldest.map(|(_, ts)| *ts),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_set_has_no_oldest_and_zero_size() {
        let mut pending = PendingSet::default();
        let snap = pending.reconcile(&[], 100);
        assert_eq!(snap.size, 0);
        assert_eq!(snap.oldest_sequence, None);
        assert_eq!(snap.oldest_timestamp, None);
    }

    #[test]
    fn oldest_is_minimum_sequence_and_size_is_count() {
        let mut pending = PendingSet::default();
        let snap = pending.reconcile(&[7, 5, 9], 100);
        assert_eq!(snap.size, 3);
        assert_eq!(snap.oldest_sequence, Some(5));
        assert_eq!(snap.oldest_timestamp, Some(100));
    }

    #[test]
    fn reconcile_is_idempotent() {
        let mut pending = PendingSet::default();
        let first = pending.reconcile(&[3, 8], 100);
        let second = pending.reconcile(&[3, 8], 100);
        assert_eq!(first, second);
    }

    #[test]
    fn first_seen_stamps_survive_later_polls() {
        let mut pending = PendingSet::default();
        pending.reconcile(&[5], 100);
        let snap = pending.reconcile(&[5, 7], 140);
        assert_eq!(snap.size, 2);
        assert_eq!(snap.oldest_sequence, Some(5));
        assert_eq!(snap.oldest_timestamp, Some(100));
    }

    #[test]
    fn resolved_sequences_are_dropped() {
        let mut pending = PendingSet::default();
        pending.reconcile(&[5, 7], 100);
        let snap = pending.reconcile(&[7], 140);
        assert_eq!(snap.size, 1);
        assert_eq!(snap.oldest_sequence, Some(7));
        assert_eq!(snap.oldest_timestamp, Some(100));
    }

    #[test]
    fn duplicate_sequences_resolve_to_earliest_stamp() {
        let mut pending = PendingSet::default();
        pending.reconcile(&[5], 100);
        // A duplicate report of 5 must neither fail nor reset its stamp.
        let snap = pending.reconcile(&[5, 5, 6], 140);
        assert_eq!(snap.size, 2);
        assert_eq!(snap.oldest_sequence, Some(5));
        assert_eq!(snap.oldest_timestamp, Some(100));
    }

    #[test]
    fn gaps_in_sequences_are_fine() {
        let mut pending = PendingSet::default();
        let snap = pending.reconcile(&[2, 1000, 1_000_000], 50);
        assert_eq!(snap.size, 3);
        assert_eq!(snap.oldest_sequence, Some(2));
    }
}
