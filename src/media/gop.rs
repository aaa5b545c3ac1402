//! GOP (Group of Pictures) buffer for late-joiner support
//!
//! When a subscriber attaches to a stream that is already live, it needs:
//! 1. The sequence headers for each track
//! 2. The most recent video keyframe
//! 3. Every packet since that keyframe
//!
//! With that, its decoders can start immediately instead of waiting for the
//! next keyframe.

use std::collections::VecDeque;

use super::packet::{MediaPacket, TrackKind};

/// Default maximum buffer size (4MB)
pub const DEFAULT_MAX_GOP_SIZE: usize = 4 * 1024 * 1024;

/// GOP buffer for late-joiner support
#[derive(Debug)]
pub struct GopBuffer {
    /// Maximum buffer size in bytes
    max_size: usize,
    /// Current buffer size in bytes
    current_size: usize,
    /// Video sequence header
    video_header: Option<MediaPacket>,
    /// Audio sequence header
    audio_header: Option<MediaPacket>,
    /// Packets since the last keyframe
    packets: VecDeque<MediaPacket>,
    /// Whether the buffer starts with a keyframe
    has_complete_gop: bool,
}

impl GopBuffer {
    /// Create a new GOP buffer with the default max size
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_GOP_SIZE)
    }

    /// Create a new GOP buffer with specified max size
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            max_size,
            current_size: 0,
            video_header: None,
            audio_header: None,
            packets: VecDeque::new(),
            has_complete_gop: false,
        }
    }

    /// Record a packet
    ///
    /// Headers replace the cached header of their track. A video keyframe
    /// starts a new GOP. Packets arriving before the first keyframe are not
    /// kept since a late joiner could not decode them.
    ///
    /// Returns true if the packet was buffered.
    pub fn push(&mut self, packet: MediaPacket) -> bool {
        if packet.is_header {
            match packet.kind {
                TrackKind::Video => self.video_header = Some(packet),
                TrackKind::Audio => self.audio_header = Some(packet),
            }
            return true;
        }

        let size = packet.size();
        let is_keyframe = packet.kind == TrackKind::Video && packet.is_keyframe;

        if is_keyframe {
            self.clear_packets();
            self.has_complete_gop = size <= self.max_size;
        }

        if !self.has_complete_gop || size > self.max_size {
            return false;
        }

        // Drop oldest packets to make room. Dropping the keyframe breaks the
        // GOP, so the buffer is reset until the next one.
        while self.current_size + size > self.max_size {
            match self.packets.pop_front() {
                Some(old) => {
                    self.current_size -= old.size();
                    if old.kind == TrackKind::Video && old.is_keyframe {
                        self.clear_packets();
                        return false;
                    }
                }
                None => break,
            }
        }

        self.current_size += size;
        self.packets.push_back(packet);
        true
    }

    /// Clear buffered packets (but keep headers)
    pub fn clear_packets(&mut self) {
        self.packets.clear();
        self.current_size = 0;
        self.has_complete_gop = false;
    }

    /// Clear everything including headers
    pub fn clear(&mut self) {
        self.clear_packets();
        self.video_header = None;
        self.audio_header = None;
    }

    /// Check if the buffer starts with a keyframe
    pub fn has_complete_gop(&self) -> bool {
        self.has_complete_gop
    }

    /// Get all data a late joiner needs
    ///
    /// Returns sequence headers followed by all buffered packets.
    pub fn catchup(&self) -> Vec<MediaPacket> {
        let mut result = Vec::with_capacity(self.packets.len() + 2);

        if let Some(h) = &self.video_header {
            result.push(h.clone());
        }
        if let Some(h) = &self.audio_header {
            result.push(h.clone());
        }

        result.extend(self.packets.iter().cloned());
        result
    }

    /// Number of buffered packets (headers excluded)
    pub fn packet_count(&self) -> usize {
        self.packets.len()
    }

    /// Current buffer size in bytes
    pub fn size(&self) -> usize {
        self.current_size
    }
}

impl Default for GopBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn video(ts: u32, keyframe: bool, len: usize) -> MediaPacket {
        MediaPacket::video(ts, Bytes::from(vec![0u8; len]), keyframe)
    }

    #[test]
    fn test_packets_before_keyframe_dropped() {
        let mut gop = GopBuffer::new();

        assert!(!gop.push(video(0, false, 10)));
        assert!(!gop.push(MediaPacket::audio(0, Bytes::from_static(&[1]))));
        assert_eq!(gop.packet_count(), 0);

        assert!(gop.push(video(33, true, 10)));
        assert!(gop.push(MediaPacket::audio(40, Bytes::from_static(&[1]))));
        assert_eq!(gop.packet_count(), 2);
    }

    #[test]
    fn test_keyframe_resets_gop() {
        let mut gop = GopBuffer::new();

        gop.push(video(0, true, 10));
        gop.push(video(33, false, 10));
        gop.push(video(66, false, 10));
        assert_eq!(gop.packet_count(), 3);

        gop.push(video(100, true, 10));
        assert_eq!(gop.packet_count(), 1);
        assert_eq!(gop.size(), 10);
    }

    #[test]
    fn test_catchup_order() {
        let mut gop = GopBuffer::new();

        gop.push(MediaPacket::audio_header(48_000, 2));
        gop.push(MediaPacket::video_header(640, 480));
        gop.push(video(0, true, 10));
        gop.push(video(33, false, 10));

        let catchup = gop.catchup();
        assert_eq!(catchup.len(), 4);
        assert_eq!(catchup[0].kind, TrackKind::Video);
        assert!(catchup[0].is_header);
        assert_eq!(catchup[1].kind, TrackKind::Audio);
        assert!(catchup[1].is_header);
        assert!(catchup[2].is_keyframe);
    }

    #[test]
    fn test_overflow_breaks_gop() {
        let mut gop = GopBuffer::with_max_size(25);

        assert!(gop.push(video(0, true, 10)));
        assert!(gop.push(video(33, false, 10)));
        // Evicting the keyframe leaves nothing decodable
        assert!(!gop.push(video(66, false, 10)));
        assert!(!gop.has_complete_gop());
        assert_eq!(gop.packet_count(), 0);

        // Too large on its own, and what follows it is undecodable
        assert!(!gop.push(video(100, true, 30)));
        assert!(!gop.push(video(133, false, 5)));
        assert!(!gop.has_complete_gop());
    }
}
