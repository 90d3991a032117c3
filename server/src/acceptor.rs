use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, info};
use senderlink::Message;
use senderlink::yamux::{Ack, Acceptor, AttachRequest};

/// Accepts every link with a non-empty address and acknowledges messages,
/// optionally rejecting every Nth one.
#[derive(Debug, Default)]
pub struct AckServer {
    reject_every: Option<u64>,
    received: AtomicU64,
    rejected: AtomicU64,
}

impl AckServer {
    pub fn new(reject_every: Option<u64>) -> Self {
        Self {
            reject_every: reject_every.filter(|n| *n > 0),
            ..Self::default()
        }
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

impl Acceptor for AckServer {
    fn attach(&self, request: &AttachRequest) -> Ack {
        if request.address.is_empty() {
            return Ack::Rejected;
        }
        info!(
            "Attach to {} (name: {}, {} attach properties)",
            request.address,
            request.options.name.as_deref().unwrap_or("-"),
            request.options.properties.len()
        );
        Ack::Accepted
    }

    fn deliver(&self, address: &str, message: &Message) -> Ack {
        let seq = self.received.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            "[{}] message {} ({} bytes)",
            address,
            message.message_id.as_deref().unwrap_or("-"),
            message.body.len()
        );

        match self.reject_every {
            Some(n) if seq % n == 0 => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                Ack::Rejected
            }
            _ => Ack::Accepted,
        }
    }
}
