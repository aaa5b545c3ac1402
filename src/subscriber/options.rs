//! Subscribe options
//!
//! Options are passed to [`Session::subscribe`](crate::Session::subscribe)
//! and frozen for the lifetime of the subscription.

use std::sync::Arc;
use std::time::Duration;

use crate::media::quality::DEFAULT_QUALITY_WINDOW;
use crate::media::AudioSink;

/// Per-subscription configuration
#[derive(Clone)]
pub struct SubscribeOptions {
    /// Decode the audio track if the stream has one
    pub subscribe_to_audio: bool,

    /// Decode the video track if the stream has one
    pub subscribe_to_video: bool,

    /// Time allowed from creation until the subscription is connected
    pub connect_timeout: Duration,

    /// Step video quality with observed packet loss
    pub adaptive_quality: bool,

    /// Packets per quality measurement window
    pub quality_window: u64,

    /// Destination for decoded audio
    pub audio_sink: Option<Arc<dyn AudioSink>>,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            subscribe_to_audio: true,
            subscribe_to_video: true,
            connect_timeout: Duration::from_secs(30),
            adaptive_quality: false,
            quality_window: DEFAULT_QUALITY_WINDOW,
            audio_sink: None,
        }
    }
}

impl SubscribeOptions {
    /// Set whether to decode audio
    pub fn subscribe_to_audio(mut self, enabled: bool) -> Self {
        self.subscribe_to_audio = enabled;
        self
    }

    /// Set whether to decode video
    pub fn subscribe_to_video(mut self, enabled: bool) -> Self {
        self.subscribe_to_video = enabled;
        self
    }

    /// Set the connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Enable adaptive quality
    pub fn adaptive_quality(mut self, enabled: bool) -> Self {
        self.adaptive_quality = enabled;
        self
    }

    /// Set the quality measurement window
    pub fn quality_window(mut self, packets: u64) -> Self {
        self.quality_window = packets.max(1);
        self
    }

    /// Set the audio sink
    pub fn audio_sink(mut self, sink: Arc<dyn AudioSink>) -> Self {
        self.audio_sink = Some(sink);
        self
    }
}

impl std::fmt::Debug for SubscribeOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscribeOptions")
            .field("subscribe_to_audio", &self.subscribe_to_audio)
            .field("subscribe_to_video", &self.subscribe_to_video)
            .field("connect_timeout", &self.connect_timeout)
            .field("adaptive_quality", &self.adaptive_quality)
            .field("quality_window", &self.quality_window)
            .field("audio_sink", &self.audio_sink.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = SubscribeOptions::default();

        assert!(options.subscribe_to_audio);
        assert!(options.subscribe_to_video);
        assert!(!options.adaptive_quality);
        assert!(options.audio_sink.is_none());
    }

    #[test]
    fn test_builder() {
        let options = SubscribeOptions::default()
            .subscribe_to_video(false)
            .connect_timeout(Duration::from_secs(2))
            .quality_window(0);

        assert!(options.subscribe_to_audio);
        assert!(!options.subscribe_to_video);
        assert_eq!(options.connect_timeout, Duration::from_secs(2));
        assert_eq!(options.quality_window, 1);
        assert!(format!("{:?}", options).contains("subscribe_to_video: false"));
    }
}
