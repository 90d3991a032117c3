//! Arena of caller-submitted messages and the two queues that reference it.
//!
//! A message lives in exactly one of the unsent queue, the in-flight set, or
//! nowhere (completed). Queues hold [`PendingId`] handles, never the records.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;

use super::Completion;
use crate::message::{Message, MessageEnqueued};

/// Stable handle of one pending send.
///
/// Handles are allocated in increasing order, so sorting them gives
/// submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct PendingId(u64);

impl fmt::Display for PendingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct PendingSend {
    /// Taken when the message is handed to the transport.
    message: Option<Message>,

    completion: Completion<MessageEnqueued>,
}

#[derive(Default)]
pub(crate) struct PendingSends {
    next_id: u64,
    records: HashMap<PendingId, PendingSend>,
    unsent: VecDeque<PendingId>,
    in_flight: BTreeSet<PendingId>,
}

impl PendingSends {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers a submitted message. It is in neither queue yet.
    pub(crate) fn insert(
        &mut self,
        message: Message,
        completion: Completion<MessageEnqueued>,
    ) -> PendingId {
        let id = PendingId(self.next_id);
        self.next_id += 1;
        self.records.insert(
            id,
            PendingSend {
                message: Some(message),
                completion,
            },
        );
        id
    }

    pub(crate) fn push_unsent(&mut self, id: PendingId) {
        if self.records.contains_key(&id) {
            self.unsent.push_back(id);
        }
    }

    /// Empties the unsent queue, oldest first. The records stay registered.
    pub(crate) fn drain_unsent(&mut self) -> Vec<PendingId> {
        self.unsent.drain(..).collect()
    }

    /// Moves a message into the in-flight set and returns it for sending.
    pub(crate) fn start_in_flight(&mut self, id: PendingId) -> Option<Message> {
        let message = self.records.get_mut(&id)?.message.take()?;
        self.in_flight.insert(id);
        Some(message)
    }

    /// Completes an in-flight message.
    ///
    /// Returns `None` if the message is no longer in flight, e.g. because a
    /// forced detach already failed it.
    pub(crate) fn finish_in_flight(&mut self, id: PendingId) -> Option<Completion<MessageEnqueued>> {
        if !self.in_flight.remove(&id) {
            return None;
        }
        self.records.remove(&id).map(|record| record.completion)
    }

    /// Removes a message wherever it currently is.
    pub(crate) fn remove(&mut self, id: PendingId) -> Option<Completion<MessageEnqueued>> {
        self.unsent.retain(|queued| *queued != id);
        self.in_flight.remove(&id);
        self.records.remove(&id).map(|record| record.completion)
    }

    /// Empties both queues: unsent first, then in-flight, each in submission order.
    pub(crate) fn flush(&mut self) -> Vec<Completion<MessageEnqueued>> {
        let unsent: Vec<PendingId> = self.unsent.drain(..).collect();
        let in_flight = std::mem::take(&mut self.in_flight);

        unsent
            .into_iter()
            .chain(in_flight)
            .filter_map(|id| self.records.remove(&id))
            .map(|record| record.completion)
            .collect()
    }

    pub(crate) fn unsent_len(&self) -> usize {
        self.unsent.len()
    }

    pub(crate) fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }
}
