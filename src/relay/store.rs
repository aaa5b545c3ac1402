//! Relay implementation
//!
//! The central store that holds all relayed streams, routes published media
//! to feeds and tracks the links connected to it.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{watch, RwLock};

use crate::media::{MediaPacket, QualityLevel, TrackKind};
use crate::stream::{StreamDescriptor, StreamId};
use crate::transport::{FeedId, MediaFeed, TransportError};

use super::config::RelayConfig;
use super::connector::RelayConnector;
use super::entry::{FeedGuard, RelayStreamStats, StreamEntry, StreamState, TrackIntent};
use super::error::RelayError;

/// Who may connect
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AccessPolicy {
    /// Anyone
    #[default]
    Open,
    /// Connectors presenting one of these tokens
    Tokens(HashSet<String>),
}

#[derive(Debug, Default)]
struct Faults {
    remaining: u32,
    error: Option<TransportError>,
}

impl Faults {
    fn arm(&mut self, count: u32, error: TransportError) {
        self.remaining = count;
        self.error = Some(error);
    }

    fn take(&mut self) -> Option<TransportError> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        self.error.clone()
    }
}

/// In-process media relay
///
/// Thread-safe via `RwLock`. Publishing and feed setup take the stream map
/// for reading only.
pub struct Relay {
    /// Map of stream ID to stream entry
    streams: RwLock<HashMap<StreamId, Arc<RwLock<StreamEntry>>>>,

    /// Configuration
    config: RelayConfig,

    access: parking_lot::RwLock<AccessPolicy>,
    connect_faults: parking_lot::Mutex<Faults>,
    open_faults: parking_lot::Mutex<Faults>,

    /// Close signal per connected link
    links: parking_lot::Mutex<HashMap<u64, watch::Sender<Option<TransportError>>>>,

    next_link_id: AtomicU64,
    next_feed_id: AtomicU64,
    connect_attempts: AtomicU64,
}

impl Relay {
    /// Create a new relay with default configuration
    pub fn new() -> Self {
        Self::with_config(RelayConfig::default())
    }

    /// Create a new relay with custom configuration
    pub fn with_config(config: RelayConfig) -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            config,
            access: parking_lot::RwLock::new(AccessPolicy::Open),
            connect_faults: parking_lot::Mutex::new(Faults::default()),
            open_faults: parking_lot::Mutex::new(Faults::default()),
            links: parking_lot::Mutex::new(HashMap::new()),
            next_link_id: AtomicU64::new(1),
            next_feed_id: AtomicU64::new(1),
            connect_attempts: AtomicU64::new(0),
        }
    }

    /// Get the relay configuration
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// A connector for this relay, presenting `token` if given
    pub fn connector(self: &Arc<Self>, token: Option<String>) -> RelayConnector {
        RelayConnector::new(Arc::clone(self), token)
    }

    /// Register a live stream
    ///
    /// An ended stream with the same ID is replaced.
    pub async fn register_stream(&self, descriptor: StreamDescriptor) -> Result<(), RelayError> {
        let id = descriptor.id().clone();
        let mut streams = self.streams.write().await;

        if let Some(entry_arc) = streams.get(&id) {
            if entry_arc.read().await.state == StreamState::Live {
                return Err(RelayError::AlreadyLive(id));
            }
        }

        tracing::info!(
            stream = %id,
            audio = descriptor.has_audio(),
            video = descriptor.has_video(),
            "Stream registered"
        );
        streams.insert(
            id,
            Arc::new(RwLock::new(StreamEntry::new(descriptor, &self.config))),
        );

        Ok(())
    }

    /// End a stream
    ///
    /// Open feeds close after draining; new feeds are refused.
    pub async fn end_stream(&self, id: &StreamId) -> Result<(), RelayError> {
        let entry_arc = self.entry(id).await?;
        let mut entry = entry_arc.write().await;

        if entry.state == StreamState::Ended {
            return Ok(());
        }
        entry.end(&self.config);

        tracing::info!(
            stream = %id,
            feeds = entry.feed_count(),
            packets = entry.packets_published,
            "Stream ended"
        );
        Ok(())
    }

    /// Publish a packet to a live stream
    ///
    /// Also updates the cached headers and GOP. Returns the number of feeds
    /// the packet reached.
    pub async fn publish(&self, id: &StreamId, packet: MediaPacket) -> Result<usize, RelayError> {
        let entry_arc = self.entry(id).await?;
        let mut entry = entry_arc.write().await;

        if entry.state == StreamState::Ended {
            return Err(RelayError::Ended(id.clone()));
        }
        Ok(entry.publish(packet))
    }

    /// Open a feed on a live stream
    ///
    /// The feed first yields the cached headers and the current GOP.
    pub async fn subscribe(&self, id: &StreamId) -> Result<MediaFeed, RelayError> {
        let entry_arc = self.entry(id).await?;
        let entry = entry_arc.read().await;

        if entry.state == StreamState::Ended {
            return Err(RelayError::Ended(id.clone()));
        }

        let feed_id = FeedId(self.next_feed_id.fetch_add(1, Ordering::Relaxed));
        let rx = entry.subscribe();
        let catchup = entry.gop_buffer.catchup();
        entry.feeds.insert(feed_id);

        tracing::info!(
            stream = %id,
            feed = %feed_id,
            feeds = entry.feed_count(),
            catchup_packets = catchup.len(),
            "Feed opened"
        );

        let guard = FeedGuard {
            feeds: Arc::clone(&entry.feeds),
            id: feed_id,
        };
        Ok(MediaFeed::new(feed_id, id.clone(), catchup, rx).with_guard(guard))
    }

    /// Descriptor of a registered stream
    pub async fn descriptor(&self, id: &StreamId) -> Option<StreamDescriptor> {
        let entry_arc = self.entry(id).await.ok()?;
        let entry = entry_arc.read().await;
        Some(entry.descriptor.clone())
    }

    /// Descriptors of all live streams
    pub async fn streams(&self) -> Vec<StreamDescriptor> {
        let streams = self.streams.read().await;
        let mut live = Vec::with_capacity(streams.len());

        for entry_arc in streams.values() {
            let entry = entry_arc.read().await;
            if entry.state == StreamState::Live {
                live.push(entry.descriptor.clone());
            }
        }

        live.sort_by(|a, b| a.id().as_str().cmp(b.id().as_str()));
        live
    }

    /// Get stream statistics
    pub async fn stream_stats(&self, id: &StreamId) -> Option<RelayStreamStats> {
        let entry_arc = self.entry(id).await.ok()?;
        let entry = entry_arc.read().await;
        Some(entry.stats())
    }

    /// Track intents of the open feeds of a stream
    pub async fn track_intents(&self, id: &StreamId) -> Vec<(FeedId, TrackIntent)> {
        match self.entry(id).await {
            Ok(entry_arc) => entry_arc.read().await.feeds.snapshot(),
            Err(_) => Vec::new(),
        }
    }

    pub(crate) async fn set_track_intent(
        &self,
        id: &StreamId,
        feed: FeedId,
        kind: TrackKind,
        enabled: bool,
    ) -> Result<(), RelayError> {
        let entry_arc = self.entry(id).await?;
        let entry = entry_arc.read().await;

        if entry.feeds.set_track(feed, kind, enabled) {
            tracing::debug!(stream = %id, feed = %feed, track = %kind, enabled = enabled, "Track intent updated");
        }
        Ok(())
    }

    pub(crate) async fn set_quality_intent(
        &self,
        id: &StreamId,
        feed: FeedId,
        level: QualityLevel,
    ) -> Result<(), RelayError> {
        let entry_arc = self.entry(id).await?;
        let entry = entry_arc.read().await;

        if entry.feeds.set_quality(feed, level) {
            tracing::debug!(stream = %id, feed = %feed, quality = %level, "Quality intent updated");
        }
        Ok(())
    }

    /// Get total number of streams
    pub async fn stream_count(&self) -> usize {
        self.streams.read().await.len()
    }

    /// Run cleanup once
    ///
    /// Removes streams that ended more than `idle_stream_timeout` ago and
    /// have no open feeds.
    pub async fn cleanup(&self) {
        let mut streams = self.streams.write().await;
        let now = Instant::now();

        let ids_to_remove: Vec<StreamId> = streams
            .iter()
            .filter_map(|(id, entry_arc)| {
                // Try to get read lock without blocking
                let entry = entry_arc.try_read().ok()?;
                let expired = entry.state == StreamState::Ended
                    && entry.feed_count() == 0
                    && entry.ended_at.is_some_and(|ended_at| {
                        now.duration_since(ended_at) > self.config.idle_stream_timeout
                    });
                expired.then(|| id.clone())
            })
            .collect();

        for id in ids_to_remove {
            streams.remove(&id);
            tracing::info!(stream = %id, "Stream removed by cleanup");
        }
    }

    /// Spawn background cleanup task
    ///
    /// Returns a handle that can be used to abort the task.
    pub fn spawn_cleanup_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let relay = Arc::clone(self);
        let interval = relay.config.cleanup_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                relay.cleanup().await;
            }
        })
    }

    /// Replace the access policy
    ///
    /// Applies to new connections only.
    pub fn set_access_policy(&self, policy: AccessPolicy) {
        *self.access.write() = policy;
    }

    /// Accept `token`, switching to token access if the relay was open
    pub fn require_token(&self, token: impl Into<String>) {
        let token = token.into();
        let mut access = self.access.write();
        if let AccessPolicy::Tokens(tokens) = &mut *access {
            tokens.insert(token);
        } else {
            *access = AccessPolicy::Tokens(HashSet::from([token]));
        }
    }

    /// Make the next `count` connection attempts fail with `error`
    pub fn fail_next_connects(&self, count: u32, error: TransportError) {
        self.connect_faults.lock().arm(count, error);
    }

    /// Make the next `count` stream opens fail with `error`
    ///
    /// The link stays up.
    pub fn fail_next_opens(&self, count: u32, error: TransportError) {
        self.open_faults.lock().arm(count, error);
    }

    pub(crate) fn take_open_fault(&self) -> Option<TransportError> {
        self.open_faults.lock().take()
    }

    /// Drop every connected link with `error`
    ///
    /// Returns the number of links severed.
    pub fn sever_links(&self, error: TransportError) -> usize {
        let links: Vec<_> = self.links.lock().drain().collect();
        for (id, closed) in &links {
            closed.send_replace(Some(error.clone()));
            tracing::debug!(link = id, error = %error, "Link severed");
        }
        links.len()
    }

    /// Number of connected links
    pub fn link_count(&self) -> usize {
        self.links.lock().len()
    }

    /// Connection attempts so far, including failed ones
    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts.load(Ordering::Relaxed)
    }

    /// Admit a new link
    pub(crate) fn accept(
        &self,
        token: Option<&str>,
    ) -> Result<(u64, watch::Receiver<Option<TransportError>>), TransportError> {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);

        if let Some(error) = self.connect_faults.lock().take() {
            return Err(error);
        }

        match &*self.access.read() {
            AccessPolicy::Open => {}
            AccessPolicy::Tokens(tokens) => {
                if !token.is_some_and(|token| tokens.contains(token)) {
                    tracing::warn!("Connection rejected: invalid token");
                    return Err(TransportError::Unauthorized("invalid token".into()));
                }
            }
        }

        let id = self.next_link_id.fetch_add(1, Ordering::Relaxed);
        let (closed_tx, closed_rx) = watch::channel(None);
        self.links.lock().insert(id, closed_tx);

        tracing::debug!(link = id, "Link accepted");
        Ok((id, closed_rx))
    }

    pub(crate) fn detach_link(&self, id: u64) {
        if self.links.lock().remove(&id).is_some() {
            tracing::debug!(link = id, "Link detached");
        }
    }

    async fn entry(&self, id: &StreamId) -> Result<Arc<RwLock<StreamEntry>>, RelayError> {
        self.streams
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| RelayError::NotFound(id.clone()))
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;

    fn stream(id: &str) -> StreamDescriptor {
        StreamDescriptor::new(id, true, true)
    }

    #[tokio::test]
    async fn test_register_stream() {
        let relay = Relay::new();
        let id = StreamId::new("cam");

        relay.register_stream(stream("cam")).await.unwrap();
        assert_eq!(relay.stream_count().await, 1);
        assert_eq!(relay.descriptor(&id).await.unwrap().id(), &id);

        // Can't register a live stream twice
        let result = relay.register_stream(stream("cam")).await;
        assert!(matches!(result, Err(RelayError::AlreadyLive(_))));
    }

    #[tokio::test]
    async fn test_subscribe_and_publish() {
        let relay = Relay::new();
        let id = StreamId::new("cam");
        relay.register_stream(stream("cam")).await.unwrap();

        let mut feed = relay.subscribe(&id).await.unwrap();
        let packet = MediaPacket::video(0, Bytes::from_static(&[0x17, 0x01]), true);
        assert_eq!(relay.publish(&id, packet).await.unwrap(), 1);

        let received = feed.recv().await.unwrap();
        assert_eq!(received.timestamp, 0);
        assert!(received.is_keyframe);

        let stats = relay.stream_stats(&id).await.unwrap();
        assert_eq!(stats.feed_count, 1);
        assert_eq!(stats.packets_published, 1);

        // Dropping the feed unregisters it
        drop(feed);
        assert_eq!(relay.stream_stats(&id).await.unwrap().feed_count, 0);
    }

    #[tokio::test]
    async fn test_subscribe_unknown_stream() {
        let relay = Relay::new();
        let result = relay.subscribe(&StreamId::new("nope")).await;
        assert!(matches!(result, Err(RelayError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_catchup_packets() {
        let relay = Relay::new();
        let id = StreamId::new("cam");
        relay.register_stream(stream("cam")).await.unwrap();

        relay
            .publish(&id, MediaPacket::video_header(1280, 720))
            .await
            .unwrap();
        relay
            .publish(&id, MediaPacket::audio_header(44_100, 2))
            .await
            .unwrap();
        relay
            .publish(&id, MediaPacket::video(33, Bytes::from_static(&[0x17]), true))
            .await
            .unwrap();

        // Late joiner
        let mut feed = relay.subscribe(&id).await.unwrap();

        // Headers + keyframe
        assert!(feed.recv().await.unwrap().is_header);
        assert!(feed.recv().await.unwrap().is_header);
        assert!(feed.recv().await.unwrap().is_keyframe);
    }

    #[tokio::test]
    async fn test_end_stream() {
        let relay = Relay::new();
        let id = StreamId::new("cam");
        relay.register_stream(stream("cam")).await.unwrap();
        let mut feed = relay.subscribe(&id).await.unwrap();

        relay
            .publish(&id, MediaPacket::audio(0, Bytes::from_static(&[1])))
            .await
            .unwrap();
        relay.end_stream(&id).await.unwrap();

        // Drains, then closes
        assert!(feed.recv().await.is_ok());
        assert_eq!(
            feed.recv().await.unwrap_err(),
            crate::transport::FeedError::Closed
        );

        assert!(matches!(
            relay.subscribe(&id).await,
            Err(RelayError::Ended(_))
        ));
        assert!(matches!(
            relay.publish(&id, MediaPacket::audio(1, Bytes::new())).await,
            Err(RelayError::Ended(_))
        ));
        assert!(relay.streams().await.is_empty());

        // Ended streams can be registered again
        relay.register_stream(stream("cam")).await.unwrap();
        assert_eq!(relay.streams().await.len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup() {
        let config = RelayConfig::default().idle_stream_timeout(Duration::from_millis(100));
        let relay = Relay::with_config(config);
        let id = StreamId::new("cam");
        relay.register_stream(stream("cam")).await.unwrap();
        relay.register_stream(stream("other")).await.unwrap();

        relay.end_stream(&id).await.unwrap();
        relay.cleanup().await;
        assert_eq!(relay.stream_count().await, 2);

        tokio::time::sleep(Duration::from_millis(150)).await;
        relay.cleanup().await;

        // Live streams are never removed
        assert_eq!(relay.stream_count().await, 1);
        assert!(relay.descriptor(&id).await.is_none());
    }

    #[tokio::test]
    async fn test_track_intents() {
        let relay = Relay::new();
        let id = StreamId::new("cam");
        relay.register_stream(stream("cam")).await.unwrap();
        let feed = relay.subscribe(&id).await.unwrap();

        relay
            .set_track_intent(&id, feed.id(), TrackKind::Audio, false)
            .await
            .unwrap();
        relay
            .set_quality_intent(&id, feed.id(), QualityLevel::Medium)
            .await
            .unwrap();

        let intents = relay.track_intents(&id).await;
        assert_eq!(intents.len(), 1);
        assert!(!intents[0].1.audio);
        assert!(intents[0].1.video);
        assert_eq!(intents[0].1.quality, Some(QualityLevel::Medium));
    }

    #[test]
    fn test_access_and_faults() {
        let relay = Relay::new();
        relay.require_token("secret");
        relay.fail_next_connects(1, TransportError::Refused("busy".into()));

        assert!(matches!(
            relay.accept(Some("secret")),
            Err(TransportError::Refused(_))
        ));
        assert!(matches!(
            relay.accept(Some("guess")),
            Err(TransportError::Unauthorized(_))
        ));
        assert!(matches!(relay.accept(None), Err(TransportError::Unauthorized(_))));

        let (_, mut closed) = relay.accept(Some("secret")).unwrap();
        assert_eq!(relay.link_count(), 1);
        assert_eq!(relay.connect_attempts(), 4);

        assert_eq!(relay.sever_links(TransportError::Timeout), 1);
        assert_eq!(relay.link_count(), 0);
        assert_eq!(
            *closed.borrow_and_update(),
            Some(TransportError::Timeout)
        );
    }
}
