use std::collections::VecDeque;

use crate::base::port_set::PortId;

/// Round-robin arbiter over a fixed set of candidate ports.
///
/// Each round visits every candidate once, in priority order. While a round is being
/// walked the next round is assembled from two partitions: candidates that were not
/// serviced go to the front (they get retried first), candidates that were serviced go
/// to the back. Relative order inside each partition is kept, so a candidate that keeps
/// losing moves ahead of every candidate that keeps winning.
#[derive(Debug, Default, Clone)]
pub struct PriorityArbiter {
    candidates: Vec<PortId>,
    round: VecDeque<PortId>,
    retry_soon: Vec<PortId>,
    cycle_to_back: Vec<PortId>,
    finalized: bool,
}

impl PriorityArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, port: PortId) {
        assert!(!self.finalized, "cannot insert into a finalized arbiter");
        self.candidates.push(port);
    }

    /// Freezes the candidate set. Must be called exactly once, after all inserts.
    pub fn finalize(&mut self) {
        assert!(!self.finalized, "arbiter finalized twice");
        self.round = self.candidates.iter().copied().collect();
        self.retry_soon.reserve(self.candidates.len());
        self.cycle_to_back.reserve(self.candidates.len());
        self.finalized = true;
    }

    /// Highest priority candidate of the current round.
    pub fn top(&self) -> PortId {
        assert!(self.finalized, "top() called before finalize()");
        *self.round.front().expect("arbiter has no candidates")
    }

    /// Reports the outcome for the candidate last returned by [`Self::top`].
    pub fn satisfied(&mut self, serviced: bool) {
        assert!(self.finalized, "satisfied() called before finalize()");
        let port = self
            .round
            .pop_front()
            .expect("satisfied() called on an empty arbiter");
        if serviced {
            self.cycle_to_back.push(port);
        } else {
            self.retry_soon.push(port);
        }

        if self.round.is_empty() {
            self.round.extend(self.retry_soon.drain(..));
            self.round.extend(self.cycle_to_back.drain(..));
        }
    }

    pub fn size(&self) -> usize {
        self.candidates.len()
    }
}
