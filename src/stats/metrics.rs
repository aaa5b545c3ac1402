//! Statistics for subscriptions

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Snapshot of a subscription's media statistics
#[derive(Debug, Clone, Default)]
pub struct SubscriberStats {
    /// Packets received from the transport
    pub packets_received: u64,
    /// Payload bytes received
    pub bytes_received: u64,
    /// Packets lost in transport (subscriber fell behind)
    pub packets_lost: u64,
    /// Packets discarded without decoding (muted, undecodable, disabled track)
    pub packets_discarded: u64,
    /// Video frames decoded
    pub video_frames: u64,
    /// Audio frames decoded
    pub audio_frames: u64,
    /// Keyframes decoded
    pub keyframes: u64,
    /// Decoder errors
    pub decode_errors: u64,
    /// Time since the subscription was created
    pub duration: Duration,
    /// Receive bitrate estimate (bits/sec)
    pub bitrate: u64,
}

impl SubscriberStats {
    /// Calculate bitrate from bytes and duration
    pub fn calculate_bitrate(&mut self) {
        let secs = self.duration.as_secs();
        if secs > 0 {
            self.bitrate = (self.bytes_received * 8) / secs;
        }
    }

    /// Fraction of packets lost in transport
    pub fn loss_ratio(&self) -> f64 {
        let total = self.packets_received + self.packets_lost;
        if total == 0 {
            0.0
        } else {
            self.packets_lost as f64 / total as f64
        }
    }
}

/// Live counters shared between the decode task and readers
#[derive(Debug)]
pub(crate) struct PipelineCounters {
    started_at: Instant,
    pub packets_received: AtomicU64,
    pub bytes_received: AtomicU64,
    pub packets_lost: AtomicU64,
    pub packets_discarded: AtomicU64,
    pub video_frames: AtomicU64,
    pub audio_frames: AtomicU64,
    pub keyframes: AtomicU64,
    pub decode_errors: AtomicU64,
}

impl PipelineCounters {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            packets_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            packets_lost: AtomicU64::new(0),
            packets_discarded: AtomicU64::new(0),
            video_frames: AtomicU64::new(0),
            audio_frames: AtomicU64::new(0),
            keyframes: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
        }
    }

    pub fn incr(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SubscriberStats {
        let mut stats = SubscriberStats {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            packets_lost: self.packets_lost.load(Ordering::Relaxed),
            packets_discarded: self.packets_discarded.load(Ordering::Relaxed),
            video_frames: self.video_frames.load(Ordering::Relaxed),
            audio_frames: self.audio_frames.load(Ordering::Relaxed),
            keyframes: self.keyframes.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            duration: self.started_at.elapsed(),
            bitrate: 0,
        };
        stats.calculate_bitrate();
        stats
    }
}
