//! # SenderLink - Sender Link Lifecycle for Messaging Clients
//!
//! SenderLink manages the lifecycle of one outbound link over an asynchronous
//! messaging transport:
//!
//! - **Lazy attach**: Sending on a detached link attaches it first
//! - **Buffering**: Messages sent before the link is ready are queued in order
//! - **Bounded outcomes**: Every send and attach completes exactly once
//! - **Recovery**: A link lost to the remote can be attached again
//! - **Pluggable transports**: Works with any [`LinkTransport`] implementation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │              Application (SenderLink handles)            │
//! ├─────────────────────────────────────────────────────────┤
//! │                 Link state machine task                  │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────┐   │
//! │  │ Unsent FIFO │ │  In-flight  │ │ Deferred replay │   │
//! │  └─────────────┘ └─────────────┘ └─────────────────┘   │
//! ├─────────────────────────────────────────────────────────┤
//! │                    Transport Layer                       │
//! │  ┌─────────────────────────────────────────────────┐   │
//! │  │      LinkTransport / Link (e.g. yamux streams)   │   │
//! │  └─────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use senderlink::{LinkOptions, Message, SenderLink};
//!
//! let link = SenderLink::new("queue/telemetry", LinkOptions::new(), transport);
//!
//! // Attaches on demand, then sends
//! let enqueued = link.send(Message::new("Hello, World!")).await?;
//!
//! link.detach();
//! ```

#![deny(unsafe_code)]

pub mod attach;
pub mod config;
pub mod error;
pub mod link;
pub mod message;
pub mod observer;
pub mod transport;

#[cfg(feature = "yamux")]
pub mod yamux;

#[cfg(test)]
mod mock;

// Re-export commonly used types
pub use attach::attach_sender_link;
pub use config::LinkOptions;
pub use error::{LinkError, Result, TransportError, TransportErrorKind, TransportResult};
pub use link::{AttachFuture, LinkState, LinkStatus, OperationFuture, SendFuture, SenderLink};
pub use message::{DeliveryState, Message, MessageEnqueued};
pub use observer::ErrorObservers;
pub use transport::{Link, LinkEvent, LinkTransport};
