//! Stream entry and state types
//!
//! This module defines the per-stream state stored in the relay.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::media::{GopBuffer, MediaPacket, QualityLevel, TrackKind};
use crate::stream::StreamDescriptor;
use crate::transport::FeedId;

use super::config::RelayConfig;

/// State of a stream entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Accepting packets and feeds
    Live,
    /// Publisher finished, waiting for cleanup
    Ended,
}

/// What a feed asked the relay to forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackIntent {
    /// Audio wanted
    pub audio: bool,
    /// Video wanted
    pub video: bool,
    /// Requested video quality
    pub quality: Option<QualityLevel>,
}

impl Default for TrackIntent {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
            quality: None,
        }
    }
}

/// Open feeds of a stream
///
/// Shared with the feeds' guards, which remove themselves on drop.
#[derive(Debug, Default)]
pub(crate) struct FeedTable {
    feeds: Mutex<HashMap<FeedId, TrackIntent>>,
}

impl FeedTable {
    pub fn insert(&self, id: FeedId) {
        self.feeds.lock().insert(id, TrackIntent::default());
    }

    pub fn remove(&self, id: FeedId) -> bool {
        self.feeds.lock().remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.feeds.lock().len()
    }

    pub fn set_track(&self, id: FeedId, kind: TrackKind, enabled: bool) -> bool {
        let mut feeds = self.feeds.lock();
        let Some(intent) = feeds.get_mut(&id) else {
            return false;
        };
        match kind {
            TrackKind::Audio => intent.audio = enabled,
            TrackKind::Video => intent.video = enabled,
        }
        true
    }

    pub fn set_quality(&self, id: FeedId, level: QualityLevel) -> bool {
        let mut feeds = self.feeds.lock();
        let Some(intent) = feeds.get_mut(&id) else {
            return false;
        };
        intent.quality = Some(level);
        true
    }

    pub fn snapshot(&self) -> Vec<(FeedId, TrackIntent)> {
        let mut intents: Vec<_> = self
            .feeds
            .lock()
            .iter()
            .map(|(id, intent)| (*id, *intent))
            .collect();
        intents.sort_by_key(|(id, _)| *id);
        intents
    }
}

/// Unregisters a feed when the subscriber drops it
pub(crate) struct FeedGuard {
    pub feeds: Arc<FeedTable>,
    pub id: FeedId,
}

impl Drop for FeedGuard {
    fn drop(&mut self) {
        if self.feeds.remove(self.id) {
            tracing::debug!(feed = %self.id, feeds = self.feeds.len(), "Feed removed");
        }
    }
}

/// Entry for a single stream in the relay
pub struct StreamEntry {
    /// Stream identity and capabilities
    pub descriptor: StreamDescriptor,

    /// Headers and GOP for late-joiner support
    pub gop_buffer: GopBuffer,

    /// Broadcast sender for fan-out to feeds
    pub(super) tx: broadcast::Sender<MediaPacket>,

    /// Open feeds and what they asked for
    pub(crate) feeds: Arc<FeedTable>,

    /// Current stream state
    pub state: StreamState,

    /// When the stream was registered
    pub created_at: Instant,

    /// When the stream ended
    pub ended_at: Option<Instant>,

    /// Packets published so far
    pub packets_published: u64,
}

impl StreamEntry {
    /// Create a new live stream entry
    pub(super) fn new(descriptor: StreamDescriptor, config: &RelayConfig) -> Self {
        let (tx, _) = broadcast::channel(config.broadcast_capacity);

        Self {
            descriptor,
            gop_buffer: GopBuffer::with_max_size(config.max_gop_size),
            tx,
            feeds: Arc::new(FeedTable::default()),
            state: StreamState::Live,
            created_at: Instant::now(),
            ended_at: None,
            packets_published: 0,
        }
    }

    /// Number of open feeds
    pub fn feed_count(&self) -> usize {
        self.feeds.len()
    }

    /// Subscribe to this stream's broadcast channel
    pub(super) fn subscribe(&self) -> broadcast::Receiver<MediaPacket> {
        self.tx.subscribe()
    }

    /// Cache and fan out a packet
    ///
    /// Returns the number of feeds that received it.
    pub(super) fn publish(&mut self, packet: MediaPacket) -> usize {
        self.packets_published += 1;
        self.gop_buffer.push(packet.clone());
        self.tx.send(packet).unwrap_or(0)
    }

    /// Mark the stream ended
    ///
    /// Replacing the sender closes every open feed once it has drained.
    pub(super) fn end(&mut self, config: &RelayConfig) {
        let (tx, _) = broadcast::channel(config.broadcast_capacity);
        self.tx = tx;
        self.gop_buffer.clear();
        self.state = StreamState::Ended;
        self.ended_at = Some(Instant::now());
    }

    pub(super) fn stats(&self) -> RelayStreamStats {
        RelayStreamStats {
            feed_count: self.feed_count(),
            state: self.state,
            gop_packet_count: self.gop_buffer.packet_count(),
            gop_size_bytes: self.gop_buffer.size(),
            packets_published: self.packets_published,
        }
    }
}

/// Statistics for a relayed stream
#[derive(Debug, Clone)]
pub struct RelayStreamStats {
    /// Number of open feeds
    pub feed_count: usize,
    /// Current stream state
    pub state: StreamState,
    /// Number of packets in GOP buffer
    pub gop_packet_count: usize,
    /// Size of GOP buffer in bytes
    pub gop_size_bytes: usize,
    /// Packets published so far
    pub packets_published: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_guard_unregisters() {
        let feeds = Arc::new(FeedTable::default());
        feeds.insert(FeedId(1));
        feeds.insert(FeedId(2));

        let guard = FeedGuard {
            feeds: Arc::clone(&feeds),
            id: FeedId(1),
        };
        assert_eq!(feeds.len(), 2);

        drop(guard);
        assert_eq!(feeds.len(), 1);
        assert!(!feeds.set_track(FeedId(1), TrackKind::Audio, false));
    }

    #[test]
    fn test_track_intents() {
        let feeds = FeedTable::default();
        feeds.insert(FeedId(3));

        assert!(feeds.set_track(FeedId(3), TrackKind::Video, false));
        assert!(feeds.set_quality(FeedId(3), QualityLevel::Low));

        let intents = feeds.snapshot();
        assert_eq!(
            intents,
            vec![(
                FeedId(3),
                TrackIntent {
                    audio: true,
                    video: false,
                    quality: Some(QualityLevel::Low),
                }
            )]
        );
    }
}
