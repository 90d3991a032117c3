//! Message and delivery outcome types carried across a sender link.

/// A message submitted for sending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    /// Application message identifier.
    pub message_id: Option<String>,

    /// Opaque payload.
    pub body: Vec<u8>,
}

impl Message {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            message_id: None,
            body: body.into(),
        }
    }

    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }
}

/// Delivery state reported by the remote for a sent message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Accepted for delivery.
    Accepted,

    /// Received but not yet settled by the remote.
    Received,

    /// Released by the remote without being processed.
    Released,

    /// Modified by the remote.
    Modified,
}

/// Successful outcome of [`SenderLink::send`](crate::SenderLink::send).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageEnqueued {
    pub delivery: DeliveryState,
}

impl MessageEnqueued {
    pub fn new(delivery: DeliveryState) -> Self {
        Self { delivery }
    }
}
