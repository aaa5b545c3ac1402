//! Media packet types
//!
//! Packets are what the transport delivers: one encoded audio or video unit
//! each, cheap to clone because the payload is reference counted.

use bytes::Bytes;

/// Kind of media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    /// Audio track
    Audio,
    /// Video track
    Video,
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

/// An encoded media unit
///
/// Sequence headers carry decoder configuration and must reach a decoder
/// before any regular packet of the same track can be decoded.
#[derive(Debug, Clone)]
pub struct MediaPacket {
    /// Track this packet belongs to
    pub kind: TrackKind,
    /// Timestamp in milliseconds
    pub timestamp: u32,
    /// Encoded payload (zero-copy via reference counting)
    pub data: Bytes,
    /// Whether this is a keyframe (video only)
    pub is_keyframe: bool,
    /// Whether this is a sequence header
    pub is_header: bool,
}

impl MediaPacket {
    /// Create a video packet
    pub fn video(timestamp: u32, data: Bytes, is_keyframe: bool) -> Self {
        Self {
            kind: TrackKind::Video,
            timestamp,
            data,
            is_keyframe,
            is_header: false,
        }
    }

    /// Create an audio packet
    pub fn audio(timestamp: u32, data: Bytes) -> Self {
        Self {
            kind: TrackKind::Audio,
            timestamp,
            data,
            is_keyframe: false,
            is_header: false,
        }
    }

    /// Create a video sequence header for the given dimensions
    pub fn video_header(width: u16, height: u16) -> Self {
        let mut data = Vec::with_capacity(4);
        data.extend_from_slice(&width.to_be_bytes());
        data.extend_from_slice(&height.to_be_bytes());

        Self {
            kind: TrackKind::Video,
            timestamp: 0,
            data: Bytes::from(data),
            is_keyframe: false,
            is_header: true,
        }
    }

    /// Create an audio sequence header
    pub fn audio_header(sample_rate: u32, channels: u8) -> Self {
        let mut data = Vec::with_capacity(5);
        data.extend_from_slice(&sample_rate.to_be_bytes());
        data.push(channels);

        Self {
            kind: TrackKind::Audio,
            timestamp: 0,
            data: Bytes::from(data),
            is_keyframe: false,
            is_header: true,
        }
    }

    /// Payload size in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }
}
