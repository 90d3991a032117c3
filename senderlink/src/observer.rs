//! Sinks for errors that have no caller waiting for them.

use log::error;
use tokio::sync::mpsc;

use crate::error::LinkError;

/// Set of subscribers notified about unhandled link errors.
///
/// A link that detaches with an error while no attach is waiting on the
/// outcome reports the error here. Closed subscribers are pruned whenever a
/// subscriber is added or an error is emitted.
#[derive(Debug, Default)]
pub struct ErrorObservers {
    sinks: Vec<mpsc::UnboundedSender<LinkError>>,
}

impl ErrorObservers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscriber and returns its receiving end.
    #[cfg(test)]
    pub(crate) fn subscribe(&mut self) -> mpsc::UnboundedReceiver<LinkError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.add(tx);
        rx
    }

    pub fn add(&mut self, sink: mpsc::UnboundedSender<LinkError>) {
        self.sinks.retain(|sink| !sink.is_closed());
        self.sinks.push(sink);
    }

    /// Returns the number of live subscribers.
    pub fn len(&self) -> usize {
        self.sinks.iter().filter(|sink| !sink.is_closed()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers `err` to every live subscriber.
    ///
    /// Returns false when nobody received it; the error is then logged.
    pub fn emit(&mut self, err: &LinkError) -> bool {
        let mut delivered = false;
        self.sinks.retain(|sink| {
            let alive = sink.send(err.clone()).is_ok();
            delivered |= alive;
            alive
        });

        if !delivered {
            error!("Unhandled sender link error: {}", err);
        }
        delivered
    }
}
