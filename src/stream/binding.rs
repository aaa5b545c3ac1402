//! Stream binding
//!
//! Capabilities are resolved once, when a subscription is created, and never
//! change afterwards.

use std::sync::Arc;
use std::time::Instant;

use crate::error::{Error, Result};
use crate::media::TrackKind;
use crate::subscriber::SubscribeOptions;

use super::descriptor::StreamDescriptor;

/// Tracks a subscription decodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackSet {
    /// Audio decode path enabled
    pub audio: bool,
    /// Video decode path enabled
    pub video: bool,
}

impl TrackSet {
    /// Check whether a track is part of the set
    pub fn contains(&self, kind: TrackKind) -> bool {
        match kind {
            TrackKind::Audio => self.audio,
            TrackKind::Video => self.video,
        }
    }

    /// Check whether no track is enabled
    pub fn is_empty(&self) -> bool {
        !self.audio && !self.video
    }
}

/// A stream frozen for the lifetime of a subscription
#[derive(Debug, Clone)]
pub struct StreamBinding {
    descriptor: Arc<StreamDescriptor>,
    tracks: TrackSet,
    bound_at: Instant,
}

impl StreamBinding {
    /// Resolve the effective tracks for a descriptor and options
    ///
    /// A track is decoded only if the stream carries it and the options ask
    /// for it.
    pub fn resolve(descriptor: StreamDescriptor, options: &SubscribeOptions) -> Result<Self> {
        descriptor.id().validate().map_err(Error::InvalidStream)?;

        let tracks = TrackSet {
            audio: descriptor.has_audio() && options.subscribe_to_audio,
            video: descriptor.has_video() && options.subscribe_to_video,
        };

        Ok(Self {
            descriptor: Arc::new(descriptor),
            tracks,
            bound_at: Instant::now(),
        })
    }

    /// The bound descriptor
    pub fn descriptor(&self) -> &Arc<StreamDescriptor> {
        &self.descriptor
    }

    /// Effective tracks
    pub fn tracks(&self) -> TrackSet {
        self.tracks
    }

    /// When the binding was resolved
    pub fn bound_at(&self) -> Instant {
        self.bound_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_defaults() {
        let before = Instant::now();
        let desc = StreamDescriptor::new("cam", true, true);
        let binding = StreamBinding::resolve(desc, &SubscribeOptions::default()).unwrap();

        assert!(binding.bound_at() >= before);
        assert_eq!(binding.descriptor().id().as_str(), "cam");

        assert_eq!(
            binding.tracks(),
            TrackSet {
                audio: true,
                video: true
            }
        );
    }

    #[test]
    fn test_missing_capability_ignores_flag() {
        let desc = StreamDescriptor::new("cam", false, true);
        let options = SubscribeOptions::default().subscribe_to_audio(true);
        let binding = StreamBinding::resolve(desc, &options).unwrap();

        assert!(!binding.tracks().contains(TrackKind::Audio));
        assert!(binding.tracks().contains(TrackKind::Video));
    }

    #[test]
    fn test_options_disable_track() {
        let desc = StreamDescriptor::new("cam", true, true);
        let options = SubscribeOptions::default().subscribe_to_video(false);
        let binding = StreamBinding::resolve(desc, &options).unwrap();

        assert!(binding.tracks().audio);
        assert!(!binding.tracks().video);
    }

    #[test]
    fn test_no_capabilities() {
        let desc = StreamDescriptor::new("cam", false, false);
        let binding = StreamBinding::resolve(desc, &SubscribeOptions::default()).unwrap();

        assert!(binding.tracks().is_empty());
    }

    #[test]
    fn test_invalid_descriptor() {
        let desc = StreamDescriptor::new("", true, true);
        let result = StreamBinding::resolve(desc, &SubscribeOptions::default());

        assert!(matches!(result, Err(Error::InvalidStream(_))));
    }
}
