//! Transport seam over the loopback relay

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::media::{QualityLevel, TrackKind};
use crate::stream::StreamId;
use crate::transport::{Connector, FeedId, Link, MediaFeed, TransportError};

use super::store::Relay;

/// Connects sessions to a [`Relay`]
#[derive(Clone)]
pub struct RelayConnector {
    relay: Arc<Relay>,
    token: Option<String>,
}

impl RelayConnector {
    pub(crate) fn new(relay: Arc<Relay>, token: Option<String>) -> Self {
        Self { relay, token }
    }

    /// The relay this connector targets
    pub fn relay(&self) -> &Arc<Relay> {
        &self.relay
    }
}

impl std::fmt::Debug for RelayConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConnector")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Connector for RelayConnector {
    async fn connect(&self) -> Result<Arc<dyn Link>, TransportError> {
        let (id, closed) = self.relay.accept(self.token.as_deref())?;
        Ok(Arc::new(RelayLink {
            id,
            relay: Arc::clone(&self.relay),
            closed,
        }))
    }
}

/// A link to a [`Relay`]
///
/// Removed from the relay when dropped.
pub struct RelayLink {
    id: u64,
    relay: Arc<Relay>,
    closed: watch::Receiver<Option<TransportError>>,
}

impl RelayLink {
    fn check_open(&self) -> Result<(), TransportError> {
        match &*self.closed.borrow() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Link for RelayLink {
    fn id(&self) -> u64 {
        self.id
    }

    async fn open_stream(&self, stream: &StreamId) -> Result<MediaFeed, TransportError> {
        self.check_open()?;
        if let Some(err) = self.relay.take_open_fault() {
            tracing::debug!(link = self.id, stream = %stream, error = %err, "Open failed");
            return Err(err);
        }
        Ok(self.relay.subscribe(stream).await?)
    }

    async fn set_track_enabled(
        &self,
        stream: &StreamId,
        feed: FeedId,
        kind: TrackKind,
        enabled: bool,
    ) -> Result<(), TransportError> {
        self.check_open()?;
        Ok(self
            .relay
            .set_track_intent(stream, feed, kind, enabled)
            .await?)
    }

    async fn request_quality(
        &self,
        stream: &StreamId,
        feed: FeedId,
        level: QualityLevel,
    ) -> Result<(), TransportError> {
        self.check_open()?;
        Ok(self.relay.set_quality_intent(stream, feed, level).await?)
    }

    async fn closed(&self) -> TransportError {
        let mut closed = self.closed.clone();
        loop {
            if let Some(err) = closed.borrow_and_update().clone() {
                return err;
            }
            if closed.changed().await.is_err() {
                // Sender dropped without a reason
                return closed.borrow().clone().unwrap_or(TransportError::Closed);
            }
        }
    }
}

impl Drop for RelayLink {
    fn drop(&mut self) {
        self.relay.detach_link(self.id);
    }
}
