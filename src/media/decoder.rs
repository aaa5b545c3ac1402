//! Frame decoding
//!
//! Decoders turn packets of one track into frames. They are codec-agnostic:
//! the payload of a regular packet is passed through as the frame body, but
//! the decodability rules of a real decoder are enforced.
//!
//! Video sequence header:
//! ```text
//! +-----------+------------+
//! | Width(2)  | Height(2)  |    big-endian
//! +-----------+------------+
//! ```
//!
//! Audio sequence header:
//! ```text
//! +----------------+-------------+
//! | SampleRate(4)  | Channels(1) |    big-endian
//! +----------------+-------------+
//! ```

use bytes::{Buf, Bytes};
use thiserror::Error;

use super::packet::{MediaPacket, TrackKind};

/// Errors that can occur during decoding
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The sequence header could not be parsed
    #[error("invalid sequence header: {0}")]
    InvalidHeader(String),

    /// A packet of another track was routed to this decoder
    #[error("{0} packet sent to {1} decoder")]
    WrongTrack(TrackKind, TrackKind),
}

/// Result type for decode operations
pub type Result<T> = std::result::Result<T, DecodeError>;

/// Decoder for one track
pub trait Decoder {
    /// Decoded output
    type Frame;

    /// Decode a packet
    ///
    /// Returns `Ok(None)` when the packet was consumed without producing a
    /// frame (headers, or packets that cannot be decoded yet).
    fn decode(&mut self, packet: &MediaPacket) -> Result<Option<Self::Frame>>;

    /// Drop decoding state that depends on previous packets
    ///
    /// Called after packet loss. Configuration from the sequence header is
    /// kept.
    fn reset(&mut self);

    /// Whether the decoder has seen its sequence header
    fn is_configured(&self) -> bool;
}

/// A decoded video frame
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Presentation timestamp in milliseconds
    pub timestamp: u32,
    /// Frame width in pixels
    pub width: u16,
    /// Frame height in pixels
    pub height: u16,
    /// Whether the frame was decoded from a keyframe
    pub keyframe: bool,
    /// Frame data
    pub data: Bytes,
}

/// A decoded audio frame
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Presentation timestamp in milliseconds
    pub timestamp: u32,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count
    pub channels: u8,
    /// Sample data
    pub data: Bytes,
}

/// Video decoder
///
/// Needs a sequence header, then a keyframe, before it produces frames.
/// After [`reset`](Decoder::reset) it waits for the next keyframe.
#[derive(Debug, Default)]
pub struct VideoDecoder {
    dimensions: Option<(u16, u16)>,
    has_reference: bool,
}

impl VideoDecoder {
    /// Create an unconfigured decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Configured frame dimensions
    pub fn dimensions(&self) -> Option<(u16, u16)> {
        self.dimensions
    }

    /// Whether the decoder is waiting for a keyframe
    pub fn awaiting_keyframe(&self) -> bool {
        !self.has_reference
    }
}

impl Decoder for VideoDecoder {
    type Frame = VideoFrame;

    fn decode(&mut self, packet: &MediaPacket) -> Result<Option<VideoFrame>> {
        if packet.kind != TrackKind::Video {
            return Err(DecodeError::WrongTrack(packet.kind, TrackKind::Video));
        }

        if packet.is_header {
            let mut data = packet.data.clone();
            if data.remaining() < 4 {
                return Err(DecodeError::InvalidHeader(format!(
                    "video header is {} bytes, expected 4",
                    data.remaining()
                )));
            }
            let width = data.get_u16();
            let height = data.get_u16();
            if width == 0 || height == 0 {
                return Err(DecodeError::InvalidHeader(format!(
                    "video dimensions {}x{}",
                    width, height
                )));
            }

            // A new configuration invalidates references
            if self.dimensions != Some((width, height)) {
                self.has_reference = false;
            }
            self.dimensions = Some((width, height));
            return Ok(None);
        }

        let Some((width, height)) = self.dimensions else {
            return Ok(None);
        };

        if packet.is_keyframe {
            self.has_reference = true;
        } else if !self.has_reference {
            return Ok(None);
        }

        Ok(Some(VideoFrame {
            timestamp: packet.timestamp,
            width,
            height,
            keyframe: packet.is_keyframe,
            data: packet.data.clone(),
        }))
    }

    fn reset(&mut self) {
        self.has_reference = false;
    }

    fn is_configured(&self) -> bool {
        self.dimensions.is_some()
    }
}

/// Audio decoder
///
/// Every audio packet is independently decodable once the sequence header
/// has been seen.
#[derive(Debug, Default)]
pub struct AudioDecoder {
    config: Option<(u32, u8)>,
}

impl AudioDecoder {
    /// Create an unconfigured decoder
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for AudioDecoder {
    type Frame = AudioFrame;

    fn decode(&mut self, packet: &MediaPacket) -> Result<Option<AudioFrame>> {
        if packet.kind != TrackKind::Audio {
            return Err(DecodeError::WrongTrack(packet.kind, TrackKind::Audio));
        }

        if packet.is_header {
            let mut data = packet.data.clone();
            if data.remaining() < 5 {
                return Err(DecodeError::InvalidHeader(format!(
                    "audio header is {} bytes, expected 5",
                    data.remaining()
                )));
            }
            let sample_rate = data.get_u32();
            let channels = data.get_u8();
            if sample_rate == 0 || channels == 0 {
                return Err(DecodeError::InvalidHeader(format!(
                    "audio config {} Hz, {} channels",
                    sample_rate, channels
                )));
            }
            self.config = Some((sample_rate, channels));
            return Ok(None);
        }

        Ok(self.config.map(|(sample_rate, channels)| AudioFrame {
            timestamp: packet.timestamp,
            sample_rate,
            channels,
            data: packet.data.clone(),
        }))
    }

    fn reset(&mut self) {}

    fn is_configured(&self) -> bool {
        self.config.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(ts: u32, keyframe: bool) -> MediaPacket {
        MediaPacket::video(ts, Bytes::from_static(&[0xAA, 0xBB]), keyframe)
    }

    #[test]
    fn test_video_needs_header_then_keyframe() {
        let mut decoder = VideoDecoder::new();

        // No header yet
        assert!(decoder.decode(&frame(0, true)).unwrap().is_none());
        assert_eq!(decoder.dimensions(), None);

        decoder
            .decode(&MediaPacket::video_header(640, 360))
            .unwrap();
        assert!(decoder.is_configured());
        assert_eq!(decoder.dimensions(), Some((640, 360)));

        // Inter frame before keyframe
        assert!(decoder.decode(&frame(33, false)).unwrap().is_none());

        let decoded = decoder.decode(&frame(66, true)).unwrap().unwrap();
        assert_eq!((decoded.width, decoded.height), (640, 360));
        assert!(decoded.keyframe);

        assert!(decoder.decode(&frame(100, false)).unwrap().is_some());
    }

    #[test]
    fn test_video_reset_waits_for_keyframe() {
        let mut decoder = VideoDecoder::new();
        decoder.decode(&MediaPacket::video_header(320, 240)).unwrap();
        decoder.decode(&frame(0, true)).unwrap();

        decoder.reset();
        assert!(decoder.awaiting_keyframe());
        assert!(decoder.decode(&frame(33, false)).unwrap().is_none());
        assert!(decoder.decode(&frame(66, true)).unwrap().is_some());
    }

    #[test]
    fn test_video_invalid_header() {
        let mut decoder = VideoDecoder::new();
        let bad = MediaPacket {
            data: Bytes::from_static(&[0x01]),
            ..MediaPacket::video_header(1, 1)
        };
        assert!(matches!(
            decoder.decode(&bad),
            Err(DecodeError::InvalidHeader(_))
        ));

        let zero = MediaPacket::video_header(0, 720);
        assert!(decoder.decode(&zero).is_err());
        assert!(!decoder.is_configured());
    }

    #[test]
    fn test_audio_decode() {
        let mut decoder = AudioDecoder::new();
        let packet = MediaPacket::audio(20, Bytes::from_static(&[1, 2, 3]));

        assert!(decoder.decode(&packet).unwrap().is_none());

        decoder
            .decode(&MediaPacket::audio_header(48_000, 2))
            .unwrap();
        let decoded = decoder.decode(&packet).unwrap().unwrap();
        assert_eq!(decoded.sample_rate, 48_000);
        assert_eq!(decoded.channels, 2);
        assert_eq!(decoded.timestamp, 20);
    }

    #[test]
    fn test_wrong_track() {
        let mut decoder = AudioDecoder::new();
        assert_eq!(
            decoder.decode(&frame(0, true)).unwrap_err(),
            DecodeError::WrongTrack(TrackKind::Video, TrackKind::Audio)
        );
    }
}
