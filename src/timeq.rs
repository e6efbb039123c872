/*
Time-queue for the discrete-event kernel.

Simulated time is kept in picoseconds so that routers and links with different clock
rates can share one timeline.  Every scheduled item carries the time it fires at and a
sequence number; items that fire at the same time are delivered in the order they were
scheduled, which keeps per-link delivery in send order.
*/

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Simulated time in picoseconds.
pub type SimTime = u64;

/// Clock cycle count of a single component.
pub type Cycle = u64;

#[derive(Debug)]
struct Scheduled<E> {
    at: SimTime,
    seq: u64,
    item: E,
}

impl<E> PartialEq for Scheduled<E> {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl<E> Eq for Scheduled<E> {}

impl<E> PartialOrd for Scheduled<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for Scheduled<E> {
    // BinaryHeap is a max-heap; invert so the earliest item pops first
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug)]
pub struct TimeQueue<E> {
    heap: BinaryHeap<Scheduled<E>>,
    next_seq: u64,
    now: SimTime,
}

impl<E> Default for TimeQueue<E> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
            now: 0,
        }
    }
}

impl<E> TimeQueue<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Schedule `item` at absolute time `at`. Scheduling in the past is clamped to now.
    pub fn schedule_at(&mut self, at: SimTime, item: E) {
        let at = at.max(self.now);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Scheduled { at, seq, item });
    }

    pub fn schedule_in(&mut self, delay: SimTime, item: E) {
        self.schedule_at(self.now.saturating_add(delay), item);
    }

    pub fn peek_time(&self) -> Option<SimTime> {
        self.heap.peek().map(|s| s.at)
    }

    /// Pops the earliest item and advances time to it.
    pub fn pop(&mut self) -> Option<(SimTime, E)> {
        let next = self.heap.pop()?;
        self.now = next.at;
        Some((next.at, next.item))
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

/// Converts a time to the index of the first clock edge strictly after it.
pub fn next_cycle(now: SimTime, period: SimTime) -> Cycle {
    debug_assert!(period > 0);
    now / period + 1
}

pub fn ceil_div(nom: u64, denom: u64) -> u64 {
    debug_assert!(denom > 0);
    nom / denom + u64::from(nom % denom != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_in_time_then_insertion_order() {
        let mut q = TimeQueue::new();
        q.schedule_at(10, "b");
        q.schedule_at(5, "a");
        q.schedule_at(10, "c");
        assert_eq!(Some((5, "a")), q.pop());
        assert_eq!(5, q.now());
        assert_eq!(Some((10, "b")), q.pop());
        assert_eq!(Some((10, "c")), q.pop());
        assert!(q.pop().is_none());
    }

    #[test]
    fn relative_scheduling_uses_current_time() {
        let mut q = TimeQueue::new();
        q.schedule_at(100, 1);
        q.pop();
        q.schedule_in(5, 2);
        q.schedule_at(0, 3);
        assert_eq!(Some((100, 3)), q.pop());
        assert_eq!(Some((105, 2)), q.pop());
    }

    #[test]
    fn cycle_helpers() {
        assert_eq!(1, next_cycle(0, 10));
        assert_eq!(2, next_cycle(10, 10));
        assert_eq!(2, next_cycle(19, 10));
        assert_eq!(3, ceil_div(17, 8));
        assert_eq!(2, ceil_div(16, 8));
        assert_eq!(u64::MAX / 8 + 1, ceil_div(u64::MAX, 8));
    }
}
