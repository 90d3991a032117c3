//! Transport collaborator abstraction.
//!
//! A [`SenderLink`](crate::SenderLink) never speaks a wire protocol itself.
//! It creates links through a [`LinkTransport`] and drives them through the
//! [`Link`] trait. Implementations decide how links map onto connections.
//!
//! # Implementations
//!
//! - `YamuxTransport`: one link per yamux stream (requires the `yamux` feature)

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tokio::sync::broadcast;

use crate::config::LinkOptions;
use crate::error::{TransportError, TransportResult};
use crate::message::{DeliveryState, Message};

/// Notification raised by a live link outside of any caller request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The remote detached the link, optionally with an error.
    Detached { error: Option<TransportError> },

    /// The link reported an error.
    ErrorReceived(TransportError),
}

/// A live sender link created by a [`LinkTransport`].
pub trait Link: Send + 'static {
    /// Hands one message to the remote.
    ///
    /// The returned future resolves once the remote settles the message. It
    /// must not borrow the link, so several sends can be outstanding at once.
    fn send(&mut self, message: Message) -> BoxFuture<'static, TransportResult<DeliveryState>>;

    /// Tears the link down immediately, without a graceful detach exchange.
    ///
    /// Outstanding sends may still resolve afterwards; nothing waits for them.
    fn force_close(&mut self);

    /// Subscribes to the link's notifications.
    ///
    /// Called once, when the link is installed. Dropping the stream
    /// unsubscribes.
    fn events(&mut self) -> BoxStream<'static, LinkEvent>;
}

/// Factory for sender links over an established connection.
pub trait LinkTransport: Send + Sync + 'static {
    type Link: Link;

    /// Starts creating a sender link to `address`.
    fn create_sender_link(
        &self,
        address: &str,
        options: &LinkOptions,
    ) -> BoxFuture<'static, TransportResult<Self::Link>>;

    /// Registers a listener for connection-level errors.
    ///
    /// Dropping the receiver removes the listener.
    fn client_errors(&self) -> broadcast::Receiver<TransportError>;
}

impl<T: LinkTransport> LinkTransport for Arc<T> {
    type Link = T::Link;

    fn create_sender_link(
        &self,
        address: &str,
        options: &LinkOptions,
    ) -> BoxFuture<'static, TransportResult<Self::Link>> {
        (**self).create_sender_link(address, options)
    }

    fn client_errors(&self) -> broadcast::Receiver<TransportError> {
        (**self).client_errors()
    }
}
