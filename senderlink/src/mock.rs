//! Scripted in-memory transport for unit tests.
//!
//! Every link creation and every send is surfaced to the test through a
//! [`MockController`], which decides when and how each one completes.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::StreamExt;
use futures::channel::mpsc as event_channel;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::config::LinkOptions;
use crate::error::{TransportError, TransportErrorKind, TransportResult};
use crate::message::{DeliveryState, Message};
use crate::transport::{Link, LinkEvent, LinkTransport};

pub(crate) struct MockTransport {
    creates: mpsc::UnboundedSender<CreateRequest>,
    sends: mpsc::UnboundedSender<SendRequest>,
    client_errors: broadcast::Sender<TransportError>,
    next_link: Arc<AtomicUsize>,
}

pub(crate) struct MockController {
    creates: mpsc::UnboundedReceiver<CreateRequest>,
    sends: mpsc::UnboundedReceiver<SendRequest>,
    client_errors: broadcast::Sender<TransportError>,
}

/// A pending link creation.
pub(crate) struct CreateRequest {
    pub(crate) address: String,
    pub(crate) options: LinkOptions,
    handle: MockLinkHandle,
    reply: oneshot::Sender<TransportResult<()>>,
}

/// A message handed to a mock link, waiting for its outcome.
pub(crate) struct SendRequest {
    pub(crate) link: usize,
    pub(crate) message: Message,
    reply: oneshot::Sender<TransportResult<DeliveryState>>,
}

pub(crate) struct MockLink {
    id: usize,
    sends: mpsc::UnboundedSender<SendRequest>,
    events: Option<event_channel::UnboundedReceiver<LinkEvent>>,
    closed: watch::Sender<bool>,
}

/// Test-side view of a created link.
pub(crate) struct MockLinkHandle {
    pub(crate) id: usize,
    events: event_channel::UnboundedSender<LinkEvent>,
    closed: watch::Receiver<bool>,
}

impl MockTransport {
    pub(crate) fn new() -> (Self, MockController) {
        let (creates_tx, creates_rx) = mpsc::unbounded_channel();
        let (sends_tx, sends_rx) = mpsc::unbounded_channel();
        let (client_errors, _) = broadcast::channel(16);

        let transport = MockTransport {
            creates: creates_tx,
            sends: sends_tx,
            client_errors: client_errors.clone(),
            next_link: Arc::new(AtomicUsize::new(1)),
        };
        let controller = MockController {
            creates: creates_rx,
            sends: sends_rx,
            client_errors,
        };
        (transport, controller)
    }
}

impl LinkTransport for MockTransport {
    type Link = MockLink;

    fn create_sender_link(
        &self,
        address: &str,
        options: &LinkOptions,
    ) -> BoxFuture<'static, TransportResult<MockLink>> {
        let id = self.next_link.fetch_add(1, Ordering::SeqCst);
        let (events_tx, events_rx) = event_channel::unbounded();
        let (closed_tx, closed_rx) = watch::channel(false);
        let link = MockLink {
            id,
            sends: self.sends.clone(),
            events: Some(events_rx),
            closed: closed_tx,
        };
        let handle = MockLinkHandle {
            id,
            events: events_tx,
            closed: closed_rx,
        };

        let (reply, outcome) = oneshot::channel();
        let _ = self.creates.send(CreateRequest {
            address: address.to_owned(),
            options: options.clone(),
            handle,
            reply,
        });

        Box::pin(async move {
            match outcome.await {
                Ok(Ok(())) => Ok(link),
                Ok(Err(err)) => Err(err),
                Err(_) => Err(TransportError::new(
                    TransportErrorKind::LinkCreation,
                    "create request dropped",
                )),
            }
        })
    }

    fn client_errors(&self) -> broadcast::Receiver<TransportError> {
        self.client_errors.subscribe()
    }
}

impl Link for MockLink {
    fn send(&mut self, message: Message) -> BoxFuture<'static, TransportResult<DeliveryState>> {
        let (reply, outcome) = oneshot::channel();
        let _ = self.sends.send(SendRequest {
            link: self.id,
            message,
            reply,
        });

        Box::pin(async move {
            outcome.await.unwrap_or_else(|_| {
                Err(TransportError::new(
                    TransportErrorKind::ConnectionLost,
                    "send request dropped",
                ))
            })
        })
    }

    fn force_close(&mut self) {
        self.closed.send_replace(true);
    }

    fn events(&mut self) -> BoxStream<'static, LinkEvent> {
        match self.events.take() {
            Some(events) => events.boxed(),
            None => futures::stream::empty().boxed(),
        }
    }
}

impl MockController {
    pub(crate) async fn next_create(&mut self) -> CreateRequest {
        self.creates.recv().await.expect("mock transport dropped")
    }

    pub(crate) fn try_next_create(&mut self) -> Option<CreateRequest> {
        self.creates.try_recv().ok()
    }

    pub(crate) async fn next_send(&mut self) -> SendRequest {
        self.sends.recv().await.expect("mock transport dropped")
    }

    pub(crate) fn try_next_send(&mut self) -> Option<SendRequest> {
        self.sends.try_recv().ok()
    }

    pub(crate) fn emit_client_error(&self, error: TransportError) {
        let _ = self.client_errors.send(error);
    }

    pub(crate) fn client_error_listeners(&self) -> usize {
        self.client_errors.receiver_count()
    }
}

impl CreateRequest {
    pub(crate) fn succeed(self) -> MockLinkHandle {
        let _ = self.reply.send(Ok(()));
        self.handle
    }

    pub(crate) fn fail(self, error: TransportError) {
        let _ = self.reply.send(Err(error));
    }
}

impl SendRequest {
    /// Returns false when nobody was waiting for the outcome any more.
    pub(crate) fn accept(self) -> bool {
        self.reply.send(Ok(DeliveryState::Accepted)).is_ok()
    }

    pub(crate) fn fail(self, error: TransportError) -> bool {
        self.reply.send(Err(error)).is_ok()
    }
}

impl MockLinkHandle {
    /// Returns false when the link no longer listens for notifications.
    pub(crate) fn emit(&self, event: LinkEvent) -> bool {
        self.events.unbounded_send(event).is_ok()
    }

    pub(crate) fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    pub(crate) async fn wait_closed(&mut self) {
        let _ = self.closed.wait_for(|closed| *closed).await;
    }
}
