//! A sender link bound to one yamux stream.

use std::collections::VecDeque;

use futures::channel::mpsc as event_channel;
use futures::future::BoxFuture;
use futures::io::{AsyncReadExt, AsyncWriteExt};
use futures::stream::BoxStream;
use futures::StreamExt as _;
use log::{debug, trace, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::wire::{self, Ack};
use crate::error::{TransportError, TransportErrorKind, TransportResult};
use crate::message::{DeliveryState, Message};
use crate::transport::{Link, LinkEvent};

type Reply = oneshot::Sender<TransportResult<DeliveryState>>;

struct Outgoing {
    message: Message,
    reply: Reply,
}

/// Live link over an attached yamux stream.
///
/// A background task owns the stream. It writes message frames in the
/// order they are sent and matches ack bytes to them first in, first out.
pub struct YamuxLink {
    address: String,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    events: Option<event_channel::UnboundedReceiver<LinkEvent>>,
    task: JoinHandle<()>,
}

impl YamuxLink {
    pub(super) fn spawn(stream: yamux::Stream, address: String) -> Self {
        let (outgoing, frames) = mpsc::unbounded_channel();
        let (notify, events) = event_channel::unbounded();
        let task = tokio::spawn(run_stream(stream, address.clone(), frames, notify));

        Self {
            address,
            outgoing,
            events: Some(events),
            task,
        }
    }
}

impl Link for YamuxLink {
    fn send(&mut self, message: Message) -> BoxFuture<'static, TransportResult<DeliveryState>> {
        // Refused here so the stream stays usable for the messages after it.
        if let Err(err) = wire::check_message(&message) {
            let err = TransportError::from(err);
            debug!("Refusing message on {}: {}", self.address, err);
            return Box::pin(futures::future::ready(Err(err)));
        }

        let (reply, outcome) = oneshot::channel();
        let queued = self.outgoing.send(Outgoing { message, reply }).is_ok();

        Box::pin(async move {
            if !queued {
                return Err(TransportError::new(
                    TransportErrorKind::ConnectionLost,
                    "stream task has stopped",
                ));
            }
            outcome.await.unwrap_or_else(|_| {
                Err(TransportError::new(
                    TransportErrorKind::ConnectionLost,
                    "stream closed before the message was settled",
                ))
            })
        })
    }

    fn force_close(&mut self) {
        debug!("Aborting stream of sender link {}", self.address);
        self.task.abort();
    }

    fn events(&mut self) -> BoxStream<'static, LinkEvent> {
        match self.events.take() {
            Some(events) => events.boxed(),
            None => futures::stream::empty().boxed(),
        }
    }
}

impl Drop for YamuxLink {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_stream(
    stream: yamux::Stream,
    address: String,
    mut frames: mpsc::UnboundedReceiver<Outgoing>,
    notify: event_channel::UnboundedSender<LinkEvent>,
) {
    let (mut reader, mut writer) = AsyncReadExt::split(stream);
    let mut awaiting: VecDeque<Reply> = VecDeque::new();
    let mut byte = [0u8; 1];

    let ended = loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Some(Outgoing { message, reply }) => {
                    match wire::write_message(&mut writer, &message).await {
                        Ok(()) => awaiting.push_back(reply),
                        Err(err) => {
                            let err = TransportError::from(err);
                            let _ = reply.send(Err(err.clone()));
                            break Some(LinkEvent::ErrorReceived(err));
                        }
                    }
                }
                None => {
                    let _ = writer.close().await;
                    break None;
                }
            },
            read = reader.read(&mut byte) => match read {
                Ok(0) => break Some(LinkEvent::Detached { error: None }),
                Ok(_) => {
                    let Some(ack) = Ack::from_u8(byte[0]) else {
                        break Some(LinkEvent::ErrorReceived(protocol_error(format!(
                            "unknown ack byte {:#04x}",
                            byte[0]
                        ))));
                    };
                    let Some(reply) = awaiting.pop_front() else {
                        break Some(LinkEvent::ErrorReceived(protocol_error(
                            "ack received with no message outstanding",
                        )));
                    };
                    trace!("Ack {:?} on {}", ack, address);
                    let _ = reply.send(ack.into_outcome());
                }
                Err(err) => break Some(LinkEvent::ErrorReceived(err.into())),
            },
        }
    };

    if let Some(event) = ended {
        match &event {
            LinkEvent::Detached { .. } => debug!("Stream of sender link {} ended", address),
            LinkEvent::ErrorReceived(err) => {
                warn!("Stream of sender link {} failed: {}", address, err)
            }
        }
        let _ = notify.unbounded_send(event);
    }

    if !awaiting.is_empty() {
        let lost = TransportError::new(
            TransportErrorKind::ConnectionLost,
            "stream closed before the message was settled",
        );
        for reply in awaiting {
            let _ = reply.send(Err(lost.clone()));
        }
    }
}

fn protocol_error(message: impl Into<String>) -> TransportError {
    TransportError::new(TransportErrorKind::Protocol, message)
}
