use std::fmt;
use std::io;

use thiserror::Error;

/// Category of a failure reported by a [`LinkTransport`](crate::LinkTransport).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The underlying connection is not established.
    NotConnected,

    /// The underlying connection failed or was closed.
    ConnectionLost,

    /// The remote refused or failed to create the link.
    LinkCreation,

    /// The remote rejected a message.
    Rejected,

    /// An I/O error on the underlying stream.
    Io,

    /// The remote sent something the transport could not understand.
    Protocol,

    /// Anything else.
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportErrorKind::NotConnected => write!(f, "not connected"),
            TransportErrorKind::ConnectionLost => write!(f, "connection lost"),
            TransportErrorKind::LinkCreation => write!(f, "link creation failed"),
            TransportErrorKind::Rejected => write!(f, "rejected"),
            TransportErrorKind::Io => write!(f, "I/O error"),
            TransportErrorKind::Protocol => write!(f, "protocol error"),
            TransportErrorKind::Other => write!(f, "other error"),
        }
    }
}

/// Error produced by a transport collaborator.
///
/// Cloneable so a single failure can be fanned out to every queued send.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    kind: TransportErrorKind,
    message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        TransportError {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::NotConnected => TransportErrorKind::NotConnected,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => TransportErrorKind::ConnectionLost,
            io::ErrorKind::InvalidData => TransportErrorKind::Protocol,
            _ => TransportErrorKind::Io,
        };
        TransportError::new(kind, err.to_string())
    }
}

/// Error reported to callers of [`SenderLink`](crate::SenderLink) operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// The link was detached while the operation was outstanding.
    #[error("link detached")]
    Detached,

    /// The link could not be attached.
    #[error("failed to attach link: {0}")]
    Attach(#[source] TransportError),

    /// The transport failed to deliver a message.
    #[error("failed to send message: {0}")]
    Send(#[source] TransportError),

    /// The live link reported an error or was detached by the remote with an error.
    #[error("link error: {0}")]
    Link(#[source] TransportError),

    /// The sender link task has shut down.
    #[error("sender link is closed")]
    Closed,
}

impl LinkError {
    /// Returns the transport error behind this failure, if any.
    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            LinkError::Attach(err) | LinkError::Send(err) | LinkError::Link(err) => Some(err),
            LinkError::Detached | LinkError::Closed => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, LinkError>;

pub type TransportResult<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_kind_mapping() {
        let err = TransportError::from(io::Error::new(io::ErrorKind::BrokenPipe, "pipe"));
        assert_eq!(err.kind(), TransportErrorKind::ConnectionLost);

        let err = TransportError::from(io::Error::new(io::ErrorKind::InvalidData, "bad frame"));
        assert_eq!(err.kind(), TransportErrorKind::Protocol);
        assert_eq!(err.message(), "bad frame");
    }

    #[test]
    fn test_link_error_exposes_transport_error() {
        let cause = TransportError::new(TransportErrorKind::Rejected, "quota exceeded");
        let err = LinkError::Send(cause.clone());
        assert_eq!(err.transport_error(), Some(&cause));
        assert_eq!(
            err.to_string(),
            "failed to send message: rejected: quota exceeded"
        );
        assert_eq!(LinkError::Detached.transport_error(), None);
    }
}
