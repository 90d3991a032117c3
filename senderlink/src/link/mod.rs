//! Sender link handle.
//!
//! A [`SenderLink`] is a cheap, cloneable handle to a state machine running
//! in its own task. Every request is posted to that task's mailbox and
//! processed in order, so transitions never interleave no matter how many
//! handles issue requests concurrently.
//!
//! # Example
//!
//! ```rust,ignore
//! use senderlink::{LinkOptions, Message, SenderLink};
//!
//! let link = SenderLink::new("queue/telemetry", LinkOptions::new(), transport);
//!
//! // Sends issued before the link is attached are buffered and flushed in order
//! let first = link.send(Message::new("hello"));
//! let second = link.send(Message::new("world"));
//!
//! first.await?;
//! second.await?;
//! link.detach();
//! ```

mod actor;
mod deferred;
mod pending;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use log::trace;
use tokio::sync::{mpsc, oneshot};

use crate::config::LinkOptions;
use crate::error::{LinkError, Result};
use crate::message::{Message, MessageEnqueued};
use crate::transport::LinkTransport;
use actor::LinkActor;

/// Delivers the outcome of one caller request.
pub(crate) type Completion<T> = oneshot::Sender<Result<T>>;

/// Sender link lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No link exists. Initial state.
    Detached,

    /// Link creation is in progress.
    Attaching,

    /// Link is live and carrying messages.
    Attached,

    /// Link is being torn down.
    Detaching,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Detached => write!(f, "detached"),
            LinkState::Attaching => write!(f, "attaching"),
            LinkState::Attached => write!(f, "attached"),
            LinkState::Detaching => write!(f, "detaching"),
        }
    }
}

/// Snapshot of a sender link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkStatus {
    /// Current state.
    pub state: LinkState,

    /// Messages waiting for the link to attach.
    pub unsent: usize,

    /// Messages handed to the transport and awaiting an outcome.
    pub in_flight: usize,
}

pub(crate) enum Command {
    Attach(Completion<()>),
    Detach,
    Send(Message, Completion<MessageEnqueued>),
    Status(oneshot::Sender<LinkStatus>),
    Subscribe(mpsc::UnboundedSender<LinkError>),
}

/// Outcome of a [`SenderLink`] request.
///
/// Dropping it does not cancel the request; the outcome is discarded.
#[must_use = "the outcome of the request is only observable by awaiting it"]
pub struct OperationFuture<T> {
    outcome: oneshot::Receiver<Result<T>>,
}

/// Resolves once an attach request settles.
pub type AttachFuture = OperationFuture<()>;

/// Resolves once a sent message is settled or failed.
pub type SendFuture = OperationFuture<MessageEnqueued>;

impl<T> Future for OperationFuture<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.outcome)
            .poll(cx)
            .map(|outcome| outcome.unwrap_or(Err(LinkError::Closed)))
    }
}

/// Handle to a sender link.
///
/// The state machine task is spawned on the current Tokio runtime by
/// [`SenderLink::new`] and shuts down, force-closing any live link, once
/// every handle is dropped.
#[derive(Clone)]
pub struct SenderLink {
    address: Arc<str>,
    commands: mpsc::UnboundedSender<Command>,
}

impl fmt::Debug for SenderLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenderLink")
            .field("address", &self.address)
            .finish()
    }
}

impl SenderLink {
    /// Creates a detached sender link bound to `address` on `transport`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new<T: LinkTransport>(
        address: impl Into<String>,
        options: LinkOptions,
        transport: T,
    ) -> Self {
        let address: String = address.into();
        let (commands, mailbox) = mpsc::unbounded_channel();

        let actor = LinkActor::new(address.clone(), options, transport, mailbox);
        tokio::spawn(actor.run());

        Self {
            address: address.into(),
            commands,
        }
    }

    /// Returns the link address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Requests that the link become ready.
    ///
    /// Resolves immediately if the link is already attached.
    pub fn attach(&self) -> AttachFuture {
        let (completion, outcome) = oneshot::channel();
        self.submit(Command::Attach(completion));
        OperationFuture { outcome }
    }

    /// Requests that the link close. Outstanding and queued sends fail.
    pub fn detach(&self) {
        self.submit(Command::Detach);
    }

    /// Submits one message.
    ///
    /// A detached link starts attaching on its own; the message is buffered
    /// until the link is ready.
    pub fn send(&self, message: Message) -> SendFuture {
        let (completion, outcome) = oneshot::channel();
        self.submit(Command::Send(message, completion));
        OperationFuture { outcome }
    }

    /// Returns a snapshot of the link.
    pub async fn status(&self) -> Result<LinkStatus> {
        let (reply, status) = oneshot::channel();
        self.submit(Command::Status(reply));
        status.await.map_err(|_| LinkError::Closed)
    }

    /// Returns the current state.
    pub async fn state(&self) -> Result<LinkState> {
        Ok(self.status().await?.state)
    }

    /// Subscribes to errors that no pending request could receive, such as
    /// an unsolicited remote detach.
    pub fn subscribe_errors(&self) -> mpsc::UnboundedReceiver<LinkError> {
        let (sink, errors) = mpsc::unbounded_channel();
        self.submit(Command::Subscribe(sink));
        errors
    }

    fn submit(&self, command: Command) {
        if self.commands.send(command).is_err() {
            trace!("Sender link {} has shut down, request dropped", self.address);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{TransportError, TransportErrorKind};
    use crate::message::DeliveryState;
    use crate::mock::{MockController, MockLinkHandle, MockTransport};
    use crate::transport::LinkEvent;

    const ADDRESS: &str = "queue/telemetry";

    fn new_link() -> (SenderLink, MockController) {
        let _ = env_logger::builder().is_test(true).try_init();
        let (transport, mock) = MockTransport::new();
        let options = LinkOptions::new().with_name("test-sender");
        (SenderLink::new(ADDRESS, options, transport), mock)
    }

    async fn attached_link() -> (SenderLink, MockController, MockLinkHandle) {
        let (link, mut mock) = new_link();
        let attached = link.attach();
        let remote = mock.next_create().await.succeed();
        attached.await.unwrap();
        (link, mock, remote)
    }

    fn lost(message: &str) -> TransportError {
        TransportError::new(TransportErrorKind::ConnectionLost, message)
    }

    #[tokio::test]
    async fn test_send_on_detached_link_attaches_then_sends() {
        let (link, mut mock) = new_link();

        let sent = link.send(Message::new("m1"));
        let create = mock.next_create().await;
        assert_eq!(create.address, ADDRESS);
        assert_eq!(create.options.name.as_deref(), Some("test-sender"));
        let _remote = create.succeed();

        let request = mock.next_send().await;
        assert_eq!(request.message.body, b"m1");
        assert!(request.accept());

        assert_eq!(
            sent.await.unwrap(),
            MessageEnqueued::new(DeliveryState::Accepted)
        );
        assert_eq!(
            link.status().await.unwrap(),
            LinkStatus {
                state: LinkState::Attached,
                unsent: 0,
                in_flight: 0,
            }
        );
    }

    #[tokio::test]
    async fn test_buffered_sends_flush_in_submission_order() {
        let (link, mut mock) = new_link();

        let first = link.send(Message::new("m1"));
        let second = link.send(Message::new("m2"));
        let third = link.send(Message::new("m3"));
        let create = mock.next_create().await;

        let status = link.status().await.unwrap();
        assert_eq!(status.state, LinkState::Attaching);
        assert_eq!(status.unsent, 3);
        assert!(mock.try_next_create().is_none());

        let _remote = create.succeed();
        for expected in ["m1", "m2", "m3"] {
            let request = mock.next_send().await;
            assert_eq!(request.message.body, expected.as_bytes());
            request.accept();
        }

        assert!(first.await.is_ok());
        assert!(second.await.is_ok());
        assert!(third.await.is_ok());
    }

    #[tokio::test]
    async fn test_detach_fails_in_flight_send() {
        let (link, mut mock, remote) = attached_link().await;

        let sent = link.send(Message::new("m1"));
        let request = mock.next_send().await;
        link.detach();

        assert_eq!(sent.await, Err(LinkError::Detached));
        assert!(remote.is_closed());
        // The late outcome has nowhere to go.
        assert!(!request.accept());
        assert_eq!(link.state().await.unwrap(), LinkState::Detached);
    }

    #[tokio::test]
    async fn test_creation_failure_fails_attach_and_queued_sends() {
        let (link, mut mock) = new_link();
        let mut errors = link.subscribe_errors();

        let attached = link.attach();
        let create = mock.next_create().await;
        let sent = link.send(Message::new("m1"));
        assert_eq!(link.status().await.unwrap().unsent, 1);

        let refused = TransportError::new(TransportErrorKind::LinkCreation, "unknown node");
        create.fail(refused.clone());

        assert_eq!(attached.await, Err(LinkError::Attach(refused.clone())));
        assert_eq!(sent.await, Err(LinkError::Attach(refused)));
        assert_eq!(link.state().await.unwrap(), LinkState::Detached);
        // The attach caller received the error, so nothing is unhandled.
        assert!(errors.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_implicit_attach_failure_reaches_observers() {
        let (link, mut mock) = new_link();
        let mut errors = link.subscribe_errors();

        let sent = link.send(Message::new("m1"));
        let refused = TransportError::new(TransportErrorKind::LinkCreation, "unknown node");
        mock.next_create().await.fail(refused.clone());

        assert_eq!(sent.await, Err(LinkError::Attach(refused.clone())));
        assert_eq!(errors.recv().await, Some(LinkError::Attach(refused)));
    }

    #[tokio::test]
    async fn test_detach_on_detached_link_is_noop() {
        let (link, mut mock) = new_link();
        let mut errors = link.subscribe_errors();

        link.detach();
        link.detach();

        assert_eq!(
            link.status().await.unwrap(),
            LinkStatus {
                state: LinkState::Detached,
                unsent: 0,
                in_flight: 0,
            }
        );
        assert!(mock.try_next_create().is_none());
        assert!(mock.try_next_send().is_none());
        assert!(errors.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_attach_on_attached_link_completes_immediately() {
        let (link, mut mock, _remote) = attached_link().await;

        assert_eq!(link.attach().await, Ok(()));
        assert_eq!(link.attach().await, Ok(()));
        assert!(mock.try_next_create().is_none());
    }

    #[tokio::test]
    async fn test_attach_while_attaching_waits_for_outcome() {
        let (link, mut mock) = new_link();

        let first = link.attach();
        let create = mock.next_create().await;
        let second = link.attach();
        assert_eq!(link.state().await.unwrap(), LinkState::Attaching);

        let _remote = create.succeed();
        assert_eq!(first.await, Ok(()));
        assert_eq!(second.await, Ok(()));
        assert!(mock.try_next_create().is_none());
    }

    #[tokio::test]
    async fn test_every_send_completes_exactly_once() {
        let (link, mut mock, remote) = attached_link().await;

        let sends: Vec<SendFuture> = (0..5)
            .map(|i| link.send(Message::new(format!("m{i}"))))
            .collect();
        let mut requests = Vec::new();
        for _ in 0..5 {
            requests.push(mock.next_send().await);
        }
        let mut sends = sends.into_iter();
        let mut requests = requests.into_iter();

        for _ in 0..2 {
            requests.next().unwrap().accept();
            assert!(sends.next().unwrap().await.is_ok());
        }
        let rejected = TransportError::new(TransportErrorKind::Rejected, "too large");
        requests.next().unwrap().fail(rejected.clone());
        assert_eq!(
            sends.next().unwrap().await,
            Err(LinkError::Send(rejected))
        );

        link.detach();
        for send in sends {
            assert_eq!(send.await, Err(LinkError::Detached));
        }
        for late in requests {
            assert!(!late.accept());
        }
        assert!(remote.is_closed());
    }

    #[tokio::test]
    async fn test_remote_detach_with_error_reaches_observers() {
        let (link, _mock, mut remote) = attached_link().await;
        let mut errors = link.subscribe_errors();
        assert_eq!(link.state().await.unwrap(), LinkState::Attached);

        let cause = lost("remote shut down");
        assert!(remote.emit(LinkEvent::Detached {
            error: Some(cause.clone())
        }));

        assert_eq!(errors.recv().await, Some(LinkError::Link(cause)));
        remote.wait_closed().await;
        assert_eq!(link.state().await.unwrap(), LinkState::Detached);
    }

    #[tokio::test]
    async fn test_remote_detach_fails_in_flight_quietly() {
        let (link, mut mock, remote) = attached_link().await;
        let mut errors = link.subscribe_errors();

        let sent = link.send(Message::new("m1"));
        let _request = mock.next_send().await;
        remote.emit(LinkEvent::Detached { error: None });

        assert_eq!(sent.await, Err(LinkError::Detached));
        assert!(errors.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_link_error_detaches_and_next_send_reattaches() {
        let (link, mut mock, mut remote) = attached_link().await;

        remote.emit(LinkEvent::ErrorReceived(lost("frame error")));
        remote.wait_closed().await;
        assert_eq!(link.state().await.unwrap(), LinkState::Detached);

        let sent = link.send(Message::new("after-error"));
        let replacement = mock.next_create().await.succeed();
        assert_ne!(replacement.id, remote.id);

        let request = mock.next_send().await;
        assert_eq!(request.link, replacement.id);
        request.accept();
        assert!(sent.await.is_ok());
    }

    #[tokio::test]
    async fn test_notifications_from_discarded_link_are_ignored() {
        let (link, mut mock, old) = attached_link().await;

        link.detach();
        let attached = link.attach();
        let _current = mock.next_create().await.succeed();
        attached.await.unwrap();

        assert!(!old.emit(LinkEvent::ErrorReceived(lost("stale"))));
        assert_eq!(link.state().await.unwrap(), LinkState::Attached);
    }

    #[tokio::test]
    async fn test_detach_while_attaching_abandons_attempt() {
        let (link, mut mock) = new_link();

        let attached = link.attach();
        let sent = link.send(Message::new("m1"));
        let create = mock.next_create().await;
        link.detach();

        assert_eq!(attached.await, Err(LinkError::Detached));
        assert_eq!(sent.await, Err(LinkError::Detached));

        // The link the abandoned attempt eventually produces is closed, not installed.
        let mut late = create.succeed();
        late.wait_closed().await;
        assert_eq!(link.state().await.unwrap(), LinkState::Detached);
        assert!(mock.try_next_send().is_none());
    }

    #[tokio::test]
    async fn test_detach_after_repeated_attach_stays_detached() {
        let (link, mut mock) = new_link();

        let first = link.attach();
        let _create = mock.next_create().await;
        let second = link.attach();
        link.detach();

        assert_eq!(first.await, Err(LinkError::Detached));
        assert_eq!(second.await, Err(LinkError::Detached));
        assert_eq!(link.state().await.unwrap(), LinkState::Detached);
        assert!(mock.try_next_create().is_none());
    }

    #[tokio::test]
    async fn test_connection_error_during_attach_fails_attach() {
        let (link, mut mock) = new_link();

        let attached = link.attach();
        let create = mock.next_create().await;
        let cause = lost("connection reset");
        mock.emit_client_error(cause.clone());
        let mut remote = create.succeed();

        assert_eq!(attached.await, Err(LinkError::Attach(cause)));
        remote.wait_closed().await;
        assert_eq!(link.state().await.unwrap(), LinkState::Detached);
    }

    #[tokio::test]
    async fn test_dropping_last_handle_closes_link() {
        let (link, mut mock, mut remote) = attached_link().await;

        let sent = link.send(Message::new("m1"));
        let _request = mock.next_send().await;
        drop(link);

        assert_eq!(sent.await, Err(LinkError::Detached));
        remote.wait_closed().await;
    }

    #[tokio::test]
    async fn test_future_of_dropped_request_reports_closed() {
        let (completion, outcome) = oneshot::channel::<Result<()>>();
        drop(completion);

        assert_eq!(OperationFuture { outcome }.await, Err(LinkError::Closed));
    }
}
