//! Demo transport carrying one sender link per yamux stream.
//!
//! The client side is [`YamuxTransport`], a [`LinkTransport`](crate::LinkTransport)
//! multiplexing links over a single connection. The receiving side is
//! [`serve_connection`], which hands every attach and message to an
//! [`Acceptor`] and writes back its verdict.
//!
//! Both ends accept any `futures::io` socket, so Tokio sockets go through
//! `tokio_util::compat`:
//!
//! ```rust,ignore
//! use tokio_util::compat::TokioAsyncReadCompatExt;
//!
//! let socket = tokio::net::UnixStream::connect(path).await?;
//! let transport = YamuxTransport::new(socket.compat());
//! ```

mod link;
mod server;
mod transport;
pub mod wire;

pub use link::YamuxLink;
pub use server::{Acceptor, serve_connection};
pub use transport::YamuxTransport;
pub use wire::{Ack, AttachRequest};
