//! Link creation guarded against connection errors.

use futures::future::BoxFuture;
use log::{debug, warn};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

use crate::config::LinkOptions;
use crate::error::{TransportError, TransportResult};
use crate::transport::{Link, LinkTransport};

/// Creates a sender link through `transport`.
///
/// A connection-error listener is registered before creation starts and
/// removed once creation settles. If the connection reported an error in
/// between, the attach fails with that error even when creation itself
/// succeeded; the link that was created is force-closed and not returned.
///
/// The returned future resolves exactly once.
pub fn attach_sender_link<T>(
    transport: &T,
    address: &str,
    options: &LinkOptions,
) -> BoxFuture<'static, TransportResult<T::Link>>
where
    T: LinkTransport + ?Sized,
{
    let mut client_errors = transport.client_errors();
    let create = transport.create_sender_link(address, options);
    let address = address.to_owned();

    Box::pin(async move {
        let created = create.await;
        let connection_error = observed_error(&mut client_errors);
        drop(client_errors);

        match (created, connection_error) {
            (Ok(link), None) => {
                debug!("Sender link created for endpoint: {}", address);
                Ok(link)
            }
            (Ok(mut link), Some(err)) => {
                warn!(
                    "Connection error while creating sender link for {}: {}",
                    address, err
                );
                link.force_close();
                Err(err)
            }
            (Err(err), _) => {
                debug!("Sender link creation failed for {}: {}", address, err);
                Err(err)
            }
        }
    })
}

fn observed_error(listener: &mut broadcast::Receiver<TransportError>) -> Option<TransportError> {
    loop {
        match listener.try_recv() {
            Ok(err) => return Some(err),
            // Overflowed the listener: errors did happen, keep reading for one.
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
        }
    }
}
