//! Transaction state.

use crate::transaction::lock::TxLockGuard;
use crate::types::{Oid, TransactionId};
use serde::Serialize;
use std::collections::BTreeMap;
use std::thread::{self, ThreadId};

/// Stage of the pool's transaction state machine.
///
/// `None -> Active -> Committing -> None` or `Active -> Aborting -> None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TxState {
    /// No transaction in progress.
    None,
    /// A transaction accepts snapshots, writes, allocations and frees.
    Active,
    /// Commit is persisting writes and executing deferred frees.
    Committing,
    /// Abort is restoring snapshots and undoing allocations.
    Aborting,
}

/// A set of disjoint half-open byte ranges.
#[derive(Debug, Clone, Default)]
pub struct RangeSet {
    /// start -> end, non-overlapping and non-adjacent.
    ranges: BTreeMap<u64, u64>,
}

impl RangeSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the set holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Iterates the ranges in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.ranges.iter().map(|(&start, &end)| (start, end))
    }

    /// Returns true if every byte of `[start, end)` is in the set.
    #[must_use]
    pub fn covers(&self, start: u64, end: u64) -> bool {
        start >= end || self.gaps(start, end).is_empty()
    }

    /// Returns the parts of `[start, end)` not yet in the set, in order.
    #[must_use]
    pub fn gaps(&self, start: u64, end: u64) -> Vec<(u64, u64)> {
        let mut gaps = Vec::new();
        let mut pos = start;

        // A range starting before `start` may still reach into it.
        if let Some((_, &prev_end)) = self.ranges.range(..start).next_back() {
            pos = pos.max(prev_end);
        }
        for (&s, &e) in self.ranges.range(start..end) {
            if s > pos {
                gaps.push((pos, s));
            }
            pos = pos.max(e);
        }
        if pos < end {
            gaps.push((pos, end));
        }
        gaps
    }

    /// Adds `[start, end)`, merging with overlapping or adjacent ranges.
    pub fn insert(&mut self, start: u64, end: u64) {
        if start >= end {
            return;
        }
        let mut new_start = start;
        let mut new_end = end;

        if let Some((&s, &e)) = self.ranges.range(..=start).next_back() {
            if e >= start {
                new_start = s;
                new_end = new_end.max(e);
            }
        }
        let absorbed: Vec<u64> = self
            .ranges
            .range(new_start..=new_end)
            .map(|(&s, _)| s)
            .collect();
        for s in absorbed {
            if let Some(e) = self.ranges.remove(&s) {
                new_end = new_end.max(e);
            }
        }
        self.ranges.insert(new_start, new_end);
    }
}

/// Volatile bookkeeping of the transaction currently in flight.
#[derive(Debug)]
pub(crate) struct ActiveTx {
    pub(crate) id: TransactionId,
    pub(crate) owner: ThreadId,
    /// Pool ranges saved in the undo log.
    pub(crate) logged: RangeSet,
    /// Data ranges of objects allocated by this transaction.
    pub(crate) fresh: RangeSet,
    /// Pool ranges written and not yet persisted.
    pub(crate) dirty: RangeSet,
    /// Objects queued for free at commit.
    pub(crate) frees: Vec<Oid>,
    /// Held until commit or abort completes.
    pub(crate) _lock: Option<TxLockGuard>,
}

impl ActiveTx {
    pub(crate) fn new(id: TransactionId, lock: Option<TxLockGuard>) -> Self {
        Self {
            id,
            owner: thread::current().id(),
            logged: RangeSet::new(),
            fresh: RangeSet::new(),
            dirty: RangeSet::new(),
            frees: Vec::new(),
            _lock: lock,
        }
    }

    /// Returns true if `[start, end)` may be written in place.
    pub(crate) fn may_write(&self, start: u64, end: u64) -> bool {
        self.fresh.covers(start, end) || self.logged.covers(start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn gaps_around_existing_ranges() {
        let mut set = RangeSet::new();
        set.insert(10, 20);
        set.insert(30, 40);

        assert_eq!(set.gaps(0, 50), vec![(0, 10), (20, 30), (40, 50)]);
        assert_eq!(set.gaps(15, 35), vec![(20, 30)]);
        assert!(set.gaps(12, 18).is_empty());
        assert!(set.covers(10, 20));
        assert!(!set.covers(10, 21));
    }

    #[test]
    fn insert_merges_adjacent_and_overlapping() {
        let mut set = RangeSet::new();
        set.insert(10, 20);
        set.insert(20, 30);
        set.insert(5, 12);
        set.insert(40, 50);
        set.insert(25, 45);

        assert_eq!(set.iter().collect::<Vec<_>>(), vec![(5, 50)]);
    }

    #[test]
    fn empty_range_is_ignored() {
        let mut set = RangeSet::new();
        set.insert(10, 10);
        assert!(set.is_empty());
        assert!(set.covers(7, 7));
    }

    proptest! {
        #[test]
        fn gaps_complement_the_set(
            ranges in prop::collection::vec((0u64..200, 1u64..40), 0..12),
            query in (0u64..200, 1u64..80),
        ) {
            let mut set = RangeSet::new();
            let mut bytes = [false; 320];
            for (start, len) in ranges {
                set.insert(start, start + len);
                for b in &mut bytes[start as usize..(start + len) as usize] {
                    *b = true;
                }
            }

            let (qs, ql) = query;
            let mut covered = vec![false; 320];
            for (s, e) in set.gaps(qs, qs + ql) {
                prop_assert!(s < e);
                for i in s..e {
                    prop_assert!(!bytes[i as usize]);
                    covered[i as usize] = true;
                }
            }
            for i in qs..qs + ql {
                prop_assert!(bytes[i as usize] || covered[i as usize]);
            }

            let listed: Vec<_> = set.iter().collect();
            for pair in listed.windows(2) {
                prop_assert!(pair[0].1 < pair[1].0);
            }
        }
    }
}
