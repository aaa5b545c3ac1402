//! Transport seam
//!
//! The wire protocol towards the media relay is not part of this crate. A
//! [`Connector`] establishes a [`Link`]; a link opens [`MediaFeed`]s, one per
//! subscribed stream, and carries track-level signaling back to the relay.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::media::{MediaPacket, QualityLevel, TrackKind};
use crate::stream::StreamId;

/// Transport-level errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The relay refused or could not accept the connection
    #[error("connection refused: {0}")]
    Refused(String),

    /// An established connection dropped
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The operation did not complete in time
    #[error("timed out")]
    Timeout,

    /// Credentials were rejected
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The requested stream does not exist or has ended
    #[error("stream not found: {0}")]
    StreamNotFound(StreamId),

    /// The connection was closed locally
    #[error("closed")]
    Closed,

    /// The transport hit an unexpected fault
    #[error("internal transport error: {0}")]
    Internal(String),
}

impl TransportError {
    /// Whether retrying cannot help
    pub fn is_permanent(&self) -> bool {
        match self {
            TransportError::Refused(_)
            | TransportError::ConnectionLost(_)
            | TransportError::Timeout => false,
            TransportError::Unauthorized(_)
            | TransportError::StreamNotFound(_)
            | TransportError::Closed
            | TransportError::Internal(_) => true,
        }
    }
}

/// Identifier of a feed on a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeedId(pub u64);

impl std::fmt::Display for FeedId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "feed-{}", self.0)
    }
}

/// Error returned by [`MediaFeed::recv`]
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum FeedError {
    /// The receiver fell behind and this many packets were skipped
    #[error("lagged by {0} packets")]
    Lagged(u64),

    /// The remote stream ended
    #[error("feed closed")]
    Closed,
}

/// Packets of one stream, as delivered by a link
///
/// Catchup packets (sequence headers and the current group of pictures) are
/// yielded first, then live packets.
pub struct MediaFeed {
    id: FeedId,
    stream: StreamId,
    catchup: VecDeque<MediaPacket>,
    rx: broadcast::Receiver<MediaPacket>,
    _guard: Option<Box<dyn Any + Send + Sync>>,
}

impl MediaFeed {
    /// Create a feed from a broadcast receiver and its catchup packets
    pub fn new(
        id: FeedId,
        stream: StreamId,
        catchup: Vec<MediaPacket>,
        rx: broadcast::Receiver<MediaPacket>,
    ) -> Self {
        Self {
            id,
            stream,
            catchup: catchup.into(),
            rx,
            _guard: None,
        }
    }

    /// Attach a value dropped together with the feed
    ///
    /// Transports use this to unregister the feed when the subscriber lets
    /// go of it.
    pub fn with_guard(mut self, guard: impl Any + Send + Sync) -> Self {
        self._guard = Some(Box::new(guard));
        self
    }

    /// Feed ID
    pub fn id(&self) -> FeedId {
        self.id
    }

    /// Stream this feed carries
    pub fn stream(&self) -> &StreamId {
        &self.stream
    }

    /// Receive the next packet
    pub async fn recv(&mut self) -> Result<MediaPacket, FeedError> {
        if let Some(packet) = self.catchup.pop_front() {
            return Ok(packet);
        }

        match self.rx.recv().await {
            Ok(packet) => Ok(packet),
            Err(broadcast::error::RecvError::Lagged(n)) => Err(FeedError::Lagged(n)),
            Err(broadcast::error::RecvError::Closed) => Err(FeedError::Closed),
        }
    }
}

impl std::fmt::Debug for MediaFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaFeed")
            .field("id", &self.id)
            .field("stream", &self.stream)
            .field("catchup", &self.catchup.len())
            .finish_non_exhaustive()
    }
}

/// Establishes links to a media relay
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a new link
    async fn connect(&self) -> Result<Arc<dyn Link>, TransportError>;
}

/// An established connection to a media relay
#[async_trait]
pub trait Link: Send + Sync + 'static {
    /// Identifier, unique per connector
    fn id(&self) -> u64;

    /// Start receiving a stream
    async fn open_stream(&self, stream: &StreamId) -> Result<MediaFeed, TransportError>;

    /// Signal whether the subscriber wants a track forwarded
    async fn set_track_enabled(
        &self,
        stream: &StreamId,
        feed: FeedId,
        kind: TrackKind,
        enabled: bool,
    ) -> Result<(), TransportError>;

    /// Ask the relay for a different video quality
    async fn request_quality(
        &self,
        stream: &StreamId,
        feed: FeedId,
        level: QualityLevel,
    ) -> Result<(), TransportError>;

    /// Resolves when the link goes down, with the reason
    async fn closed(&self) -> TransportError;
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn test_permanence() {
        assert!(!TransportError::Refused("busy".into()).is_permanent());
        assert!(!TransportError::Timeout.is_permanent());
        assert!(TransportError::Unauthorized("nope".into()).is_permanent());
        assert!(TransportError::StreamNotFound(StreamId::new("x")).is_permanent());
    }

    #[tokio::test]
    async fn test_feed_yields_catchup_first() {
        let (tx, rx) = broadcast::channel(8);
        let catchup = vec![MediaPacket::video_header(320, 240)];
        let mut feed = MediaFeed::new(FeedId(1), StreamId::new("cam"), catchup, rx);

        tx.send(MediaPacket::audio(10, Bytes::from_static(&[1])))
            .unwrap();

        let first = feed.recv().await.unwrap();
        assert!(first.is_header);
        let second = feed.recv().await.unwrap();
        assert_eq!(second.kind, TrackKind::Audio);

        drop(tx);
        assert_eq!(feed.recv().await.unwrap_err(), FeedError::Closed);
    }

    #[tokio::test]
    async fn test_feed_reports_lag() {
        let (tx, rx) = broadcast::channel(2);
        let mut feed = MediaFeed::new(FeedId(1), StreamId::new("cam"), Vec::new(), rx);

        for ts in 0..5 {
            tx.send(MediaPacket::audio(ts, Bytes::from_static(&[1])))
                .unwrap();
        }

        assert_eq!(feed.recv().await.unwrap_err(), FeedError::Lagged(3));
        assert_eq!(feed.recv().await.unwrap().timestamp, 3);
    }
}
