//! Timer table for deadline-driven wakeups.
//!
//! A min-heap of `(deadline, id)` pairs ordered by deadline with insertion
//! order as the tie-break, plus a side table of callbacks. Cancellation
//! removes the callback and leaves a tombstone in the heap that firing
//! skips, so `sleep` teardown can clear timers cheaply. The side table is
//! also the leak check: an empty table means no outstanding timers.

use crate::types::{Time, TimerId};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
struct TimerEntry {
    deadline: Time,
    id: u64,
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest deadline first);
        // insertion order breaks ties.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

type TimerCallback = Box<dyn FnOnce()>;

/// A min-heap of timers with tombstone cancellation.
#[derive(Default)]
pub(crate) struct TimerTable {
    heap: BinaryHeap<TimerEntry>,
    callbacks: HashMap<u64, TimerCallback>,
    next_id: u64,
}

impl TimerTable {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            callbacks: HashMap::new(),
            next_id: 1,
        }
    }

    /// Number of timers installed and not yet fired or cancelled.
    pub fn outstanding(&self) -> usize {
        self.callbacks.len()
    }

    /// Installs a timer firing `callback` at `deadline`.
    pub fn insert(&mut self, deadline: Time, callback: TimerCallback) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        self.heap.push(TimerEntry { deadline, id });
        self.callbacks.insert(id, callback);
        TimerId(id)
    }

    /// Cancels a timer. Returns true if it had not fired yet.
    pub fn cancel(&mut self, timer: TimerId) -> bool {
        self.callbacks.remove(&timer.0).is_some()
    }

    /// Returns the earliest live deadline, discarding tombstones.
    pub fn next_deadline(&mut self) -> Option<Time> {
        while let Some(entry) = self.heap.peek() {
            if self.callbacks.contains_key(&entry.id) {
                return Some(entry.deadline);
            }
            self.heap.pop();
        }
        None
    }

    /// Removes and returns the callbacks of all timers due at `now`.
    ///
    /// Callbacks are returned rather than invoked so the caller can run
    /// them without holding the runtime core borrowed.
    pub fn pop_due(&mut self, now: Time) -> Vec<TimerCallback> {
        let mut due = Vec::new();
        while let Some(entry) = self.heap.peek() {
            if entry.deadline > now {
                break;
            }
            let entry = *entry;
            self.heap.pop();
            if let Some(cb) = self.callbacks.remove(&entry.id) {
                due.push(cb);
            }
        }
        due
    }
}

impl std::fmt::Debug for TimerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerTable")
            .field("outstanding", &self.callbacks.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn empty_table_has_no_deadline() {
        let mut timers = TimerTable::new();
        assert_eq!(timers.outstanding(), 0);
        assert_eq!(timers.next_deadline(), None);
    }

    #[test]
    fn insert_orders_by_deadline() {
        let mut timers = TimerTable::new();
        timers.insert(Time::from_millis(200), Box::new(|| {}));
        timers.insert(Time::from_millis(100), Box::new(|| {}));
        timers.insert(Time::from_millis(150), Box::new(|| {}));

        assert_eq!(timers.next_deadline(), Some(Time::from_millis(100)));
    }

    #[test]
    fn pop_due_returns_all_due_callbacks() {
        let fired = Rc::new(Cell::new(0));
        let mut timers = TimerTable::new();
        for deadline in [100, 200, 50] {
            let fired = Rc::clone(&fired);
            timers.insert(
                Time::from_millis(deadline),
                Box::new(move || fired.set(fired.get() + 1)),
            );
        }

        let due = timers.pop_due(Time::from_millis(125));
        assert_eq!(due.len(), 2);
        for cb in due {
            cb();
        }
        assert_eq!(fired.get(), 2);
        assert_eq!(timers.outstanding(), 1);
        assert_eq!(timers.next_deadline(), Some(Time::from_millis(200)));
    }

    #[test]
    fn cancel_leaves_tombstone_behind() {
        let mut timers = TimerTable::new();
        let early = timers.insert(Time::from_millis(10), Box::new(|| panic!("cancelled")));
        timers.insert(Time::from_millis(20), Box::new(|| {}));

        assert!(timers.cancel(early));
        assert!(!timers.cancel(early));
        assert_eq!(timers.outstanding(), 1);
        // The tombstone is skipped when looking for the next deadline.
        assert_eq!(timers.next_deadline(), Some(Time::from_millis(20)));
        assert_eq!(timers.pop_due(Time::from_millis(25)).len(), 1);
    }

    #[test]
    fn cancel_none_is_noop() {
        let mut timers = TimerTable::new();
        assert!(!timers.cancel(TimerId::NONE));
    }
}
