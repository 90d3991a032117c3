use std::collections::VecDeque;
use std::task::Poll;

use futures::future::{poll_fn, BoxFuture};
use futures::io::{AsyncRead, AsyncWrite};
use log::{debug, info, warn};
use tokio::sync::{broadcast, mpsc, oneshot};
use yamux::{Config, Connection, ConnectionError, Mode};

use super::link::YamuxLink;
use super::wire::{self, Ack};
use crate::config::LinkOptions;
use crate::error::{TransportError, TransportErrorKind, TransportResult};
use crate::transport::LinkTransport;

type OpenReply = oneshot::Sender<TransportResult<yamux::Stream>>;

/// Client side of the demo transport.
///
/// Owns one yamux connection, driven by a background task. Each sender link
/// gets a fresh outbound stream. Dropping the transport closes the connection.
pub struct YamuxTransport {
    opens: mpsc::UnboundedSender<OpenReply>,
    client_errors: broadcast::Sender<TransportError>,
}

impl YamuxTransport {
    pub fn new<S>(socket: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Self::with_config(socket, Config::default())
    }

    pub fn with_config<S>(socket: S, config: Config) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let conn = Connection::new(socket, config, Mode::Client);
        let (opens, requests) = mpsc::unbounded_channel();
        let (client_errors, _) = broadcast::channel(16);

        tokio::spawn(drive(conn, requests, client_errors.clone()));

        Self {
            opens,
            client_errors,
        }
    }

    fn open_stream(&self) -> BoxFuture<'static, TransportResult<yamux::Stream>> {
        let (reply, opened) = oneshot::channel();
        let queued = self.opens.send(reply).is_ok();

        Box::pin(async move {
            if !queued {
                return Err(TransportError::new(
                    TransportErrorKind::NotConnected,
                    "connection is closed",
                ));
            }
            opened.await.unwrap_or_else(|_| {
                Err(TransportError::new(
                    TransportErrorKind::ConnectionLost,
                    "connection closed while opening a stream",
                ))
            })
        })
    }
}

impl LinkTransport for YamuxTransport {
    type Link = YamuxLink;

    fn create_sender_link(
        &self,
        address: &str,
        options: &LinkOptions,
    ) -> BoxFuture<'static, TransportResult<YamuxLink>> {
        let open = self.open_stream();
        let address = address.to_owned();
        let options = options.clone();

        Box::pin(async move {
            let mut stream = open.await?;
            wire::write_attach(&mut stream, &address, &options).await?;

            match wire::read_ack(&mut stream).await? {
                Some(Ack::Accepted) => {
                    debug!("Stream attached to {}", address);
                    Ok(YamuxLink::spawn(stream, address))
                }
                Some(ack) => Err(TransportError::new(
                    TransportErrorKind::LinkCreation,
                    format!("attach to {} refused ({:?})", address, ack),
                )),
                None => Err(TransportError::new(
                    TransportErrorKind::LinkCreation,
                    format!("stream closed before attach to {} was answered", address),
                )),
            }
        })
    }

    fn client_errors(&self) -> broadcast::Receiver<TransportError> {
        self.client_errors.subscribe()
    }
}

/// Drives the connection: opens requested streams and processes inbound
/// frames until the connection ends or every transport handle is gone.
async fn drive<S>(
    mut conn: Connection<S>,
    mut requests: mpsc::UnboundedReceiver<OpenReply>,
    client_errors: broadcast::Sender<TransportError>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut waiting: VecDeque<OpenReply> = VecDeque::new();
    let mut released = false;

    let ended: Result<(), ConnectionError> = poll_fn(|cx| loop {
        while !released {
            match requests.poll_recv(cx) {
                Poll::Ready(Some(reply)) => waiting.push_back(reply),
                Poll::Ready(None) => released = true,
                Poll::Pending => break,
            }
        }

        let mut opened = false;
        if !waiting.is_empty() {
            match conn.poll_new_outbound(cx) {
                Poll::Ready(Ok(stream)) => {
                    if let Some(reply) = waiting.pop_front() {
                        let _ = reply.send(Ok(stream));
                    }
                    opened = true;
                }
                Poll::Ready(Err(err)) => return Poll::Ready(Err(err)),
                Poll::Pending => {}
            }
        }

        if released && waiting.is_empty() {
            return conn.poll_close(cx);
        }

        // Inbound frames are only processed while this is polled.
        match conn.poll_next_inbound(cx) {
            Poll::Ready(Some(Ok(_stream))) => {
                debug!("Dropping unexpected inbound stream");
            }
            Poll::Ready(Some(Err(err))) => return Poll::Ready(Err(err)),
            Poll::Ready(None) => return Poll::Ready(Ok(())),
            Poll::Pending if opened => {}
            Poll::Pending => return Poll::Pending,
        }
    })
    .await;

    let lost = match ended {
        Ok(()) if released => {
            debug!("Connection closed, transport dropped");
            return;
        }
        Ok(()) => {
            info!("Connection closed by peer");
            TransportError::new(TransportErrorKind::ConnectionLost, "connection closed by peer")
        }
        Err(err) => {
            warn!("Connection error: {}", err);
            TransportError::new(TransportErrorKind::ConnectionLost, err.to_string())
        }
    };
    let _ = client_errors.send(lost.clone());

    let reason = lost.message().to_owned();
    for reply in waiting {
        let _ = reply.send(Err(TransportError::new(
            TransportErrorKind::ConnectionLost,
            reason.clone(),
        )));
    }
}
