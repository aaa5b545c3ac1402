//! Relay error types

use thiserror::Error;

use crate::stream::StreamId;
use crate::transport::TransportError;

/// Error type for relay operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RelayError {
    /// No stream with this ID was registered
    #[error("stream not found: {0}")]
    NotFound(StreamId),

    /// The stream is already live
    #[error("stream already live: {0}")]
    AlreadyLive(StreamId),

    /// The stream has ended
    #[error("stream ended: {0}")]
    Ended(StreamId),
}

impl From<RelayError> for TransportError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::NotFound(id) | RelayError::Ended(id) => TransportError::StreamNotFound(id),
            RelayError::AlreadyLive(id) => {
                TransportError::Internal(format!("stream already live: {}", id))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_transport_error() {
        let err: TransportError = RelayError::Ended(StreamId::new("cam")).into();
        assert_eq!(err, TransportError::StreamNotFound(StreamId::new("cam")));
        assert!(err.is_permanent());
    }
}
