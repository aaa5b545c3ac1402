//! Error types
//!
//! Two layers of errors exist. [`Error`] is returned synchronously by the
//! public API, only for malformed input or misuse. [`ErrorKind`] is the
//! taxonomy delivered asynchronously through
//! [`SubscriberObserver::on_failed`](crate::SubscriberObserver::on_failed)
//! once a subscription has been created.

use thiserror::Error;

use crate::transport::TransportError;

/// Reason a subscription failed to connect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Network or negotiation failure, including exhausted retries
    ConnectionFailed,
    /// Credential or permission rejection
    Unauthorized,
    /// The remote stream ended (or never existed) before the bind completed
    StreamUnavailable,
    /// Unexpected pipeline fault
    InternalFailure,
}

impl ErrorKind {
    /// Classify a transport error
    pub fn from_transport(err: &TransportError) -> Self {
        match err {
            TransportError::Unauthorized(_) => ErrorKind::Unauthorized,
            TransportError::StreamNotFound(_) => ErrorKind::StreamUnavailable,
            TransportError::Refused(_)
            | TransportError::ConnectionLost(_)
            | TransportError::Timeout
            | TransportError::Closed => ErrorKind::ConnectionFailed,
            TransportError::Internal(_) => ErrorKind::InternalFailure,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::ConnectionFailed => write!(f, "connection failed"),
            ErrorKind::Unauthorized => write!(f, "unauthorized"),
            ErrorKind::StreamUnavailable => write!(f, "stream unavailable"),
            ErrorKind::InternalFailure => write!(f, "internal failure"),
        }
    }
}

/// Synchronous API errors
#[derive(Debug, Error)]
pub enum Error {
    /// The stream descriptor cannot be bound
    #[error("invalid stream descriptor: {0}")]
    InvalidStream(String),

    /// The session has been closed
    #[error("session is closed")]
    SessionClosed,

    /// Called outside of a tokio runtime
    #[error("no tokio runtime available")]
    NoRuntime,

    /// Transport failure surfaced to a direct caller
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Result alias for the public API
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamId;

    #[test]
    fn test_transport_classification() {
        assert_eq!(
            ErrorKind::from_transport(&TransportError::Unauthorized("bad token".into())),
            ErrorKind::Unauthorized
        );
        assert_eq!(
            ErrorKind::from_transport(&TransportError::StreamNotFound(StreamId::new("cam"))),
            ErrorKind::StreamUnavailable
        );
        assert_eq!(
            ErrorKind::from_transport(&TransportError::Timeout),
            ErrorKind::ConnectionFailed
        );
        assert_eq!(
            ErrorKind::from_transport(&TransportError::Internal("boom".into())),
            ErrorKind::InternalFailure
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(ErrorKind::StreamUnavailable.to_string(), "stream unavailable");
        let err = Error::from(TransportError::Timeout);
        assert_eq!(err.to_string(), "transport error: timed out");
    }
}
