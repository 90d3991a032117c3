//! Receiving end of the demo transport.

use std::io;
use std::sync::Arc;

use futures::future::poll_fn;
use futures::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use log::{debug, info, warn};
use yamux::{Config, Connection, ConnectionError, Mode};

use super::wire::{self, Ack, AttachRequest};
use crate::message::Message;

/// Decides the fate of incoming links and messages.
pub trait Acceptor: Send + Sync + 'static {
    /// Returns [`Ack::Accepted`] to grant the attach. Anything else refuses it.
    fn attach(&self, request: &AttachRequest) -> Ack;

    /// Settles one message received on the link attached to `address`.
    fn deliver(&self, address: &str, message: &Message) -> Ack;
}

/// Serves sender links arriving on one connection until it closes.
///
/// Every inbound stream is handled on its own task.
pub async fn serve_connection<S, A>(socket: S, acceptor: Arc<A>) -> Result<(), ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    A: Acceptor,
{
    let mut conn = Connection::new(socket, Config::default(), Mode::Server);

    while let Some(stream) = poll_fn(|cx| conn.poll_next_inbound(cx)).await {
        let stream = stream?;
        let acceptor = acceptor.clone();
        tokio::spawn(async move {
            if let Err(err) = serve_stream(stream, acceptor).await {
                warn!("Sender link stream failed: {}", err);
            }
        });
    }

    debug!("Connection closed by peer");
    Ok(())
}

async fn serve_stream<A: Acceptor>(mut stream: yamux::Stream, acceptor: Arc<A>) -> io::Result<()> {
    let Some(request) = wire::read_attach(&mut stream).await? else {
        return Ok(());
    };

    let verdict = acceptor.attach(&request);
    wire::write_ack(&mut stream, verdict).await?;
    if verdict != Ack::Accepted {
        info!("Refused sender link to {}", request.address);
        return stream.close().await;
    }
    info!("Sender link attached to {}", request.address);

    let mut received = 0usize;
    while let Some(message) = wire::read_message(&mut stream).await? {
        received += 1;
        let ack = acceptor.deliver(&request.address, &message);
        wire::write_ack(&mut stream, ack).await?;
    }

    info!(
        "Sender link to {} detached after {} message(s)",
        request.address, received
    );
    stream.close().await
}
