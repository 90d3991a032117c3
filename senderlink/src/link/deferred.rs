//! Operations postponed until the state machine reaches a given state.

use std::collections::VecDeque;

use super::LinkState;

/// When a deferred operation becomes eligible for replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReplayWhen {
    /// Once the link is detached.
    Detached,

    /// Once a pending attach has settled either way.
    Settled,
}

impl ReplayWhen {
    fn is_reached(self, state: LinkState) -> bool {
        match self {
            ReplayWhen::Detached => state == LinkState::Detached,
            ReplayWhen::Settled => matches!(state, LinkState::Attached | LinkState::Detached),
        }
    }
}

/// FIFO of deferred operations.
pub(crate) struct Deferred<Op> {
    queue: VecDeque<(ReplayWhen, Op)>,
}

impl<Op> Deferred<Op> {
    pub(crate) fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    pub(crate) fn defer(&mut self, op: Op, when: ReplayWhen) {
        self.queue.push_back((when, op));
    }

    /// Removes and returns, in deferral order, every operation eligible in `state`.
    pub(crate) fn take_ready(&mut self, state: LinkState) -> Vec<Op> {
        let mut ready = Vec::new();
        let mut waiting = VecDeque::with_capacity(self.queue.len());

        for (when, op) in self.queue.drain(..) {
            if when.is_reached(state) {
                ready.push(op);
            } else {
                waiting.push_back((when, op));
            }
        }

        self.queue = waiting;
        ready
    }

    /// Removes and returns, in deferral order, every operation waiting for `when`.
    pub(crate) fn take_waiting(&mut self, when: ReplayWhen) -> Vec<Op> {
        let (taken, kept): (VecDeque<_>, VecDeque<_>) =
            self.queue.drain(..).partition(|(w, _)| *w == when);
        self.queue = kept;
        taken.into_iter().map(|(_, op)| op).collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }
}
