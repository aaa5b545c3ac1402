//! Per-subscription decode pipeline
//!
//! Audio and video are decoded on independent paths. A path exists only if
//! the stream binding enabled it; muting pauses an existing path without
//! touching the other one or the transport feed.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::stats::PipelineCounters;
use crate::subscriber::dispatch::DeliveryGate;
use crate::stream::{StreamId, TrackSet};
use crate::subscriber::SubscribeOptions;
use crate::transport::{FeedError, FeedId, Link, LinkWatch, MediaFeed};

use super::decoder::{AudioDecoder, AudioFrame, Decoder, VideoDecoder};
use super::packet::{MediaPacket, TrackKind};
use super::quality::{QualityLevel, QualityMonitor};
use super::render::RenderTarget;

/// Consumer of decoded audio
pub trait AudioSink: Send + Sync + 'static {
    /// Play a decoded frame
    fn play(&self, frame: AudioFrame);
}

/// Something the subscriber should hear about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PipelineEvent {
    FirstVideoFrame,
    QualityChanged(QualityLevel),
}

/// Control messages from the subscription handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TrackCommand {
    SetMuted(TrackKind, bool),
}

/// Why [`MediaPipeline::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PipelineExit {
    /// The remote stream ended
    FeedClosed,
    /// The link carrying the feed went away
    LinkLost,
    /// The subscription handle is gone
    Detached,
}

pub(crate) struct MediaPipeline {
    stream: StreamId,
    tracks: TrackSet,
    video: Option<VideoDecoder>,
    audio: Option<AudioDecoder>,
    video_muted: bool,
    audio_muted: bool,
    render: Arc<RenderTarget>,
    audio_sink: Option<Arc<dyn AudioSink>>,
    quality: Option<QualityMonitor>,
    counters: Arc<PipelineCounters>,
    gate: Arc<DeliveryGate>,
    first_video: bool,
}

impl MediaPipeline {
    pub fn new(
        stream: StreamId,
        tracks: TrackSet,
        options: &SubscribeOptions,
        render: Arc<RenderTarget>,
        counters: Arc<PipelineCounters>,
        gate: Arc<DeliveryGate>,
    ) -> Self {
        let quality = (options.adaptive_quality && tracks.video)
            .then(|| QualityMonitor::with_window(options.quality_window));

        Self {
            stream,
            tracks,
            video: tracks.video.then(VideoDecoder::new),
            audio: tracks.audio.then(AudioDecoder::new),
            video_muted: false,
            audio_muted: false,
            render,
            audio_sink: options.audio_sink.clone(),
            quality,
            counters,
            gate,
            first_video: false,
        }
    }

    /// Current quality preference, if adaptive quality is active
    pub fn quality(&self) -> Option<QualityLevel> {
        self.quality.as_ref().map(QualityMonitor::level)
    }

    fn is_muted(&self, kind: TrackKind) -> bool {
        match kind {
            TrackKind::Audio => self.audio_muted,
            TrackKind::Video => self.video_muted,
        }
    }

    /// Pause or resume a decode path
    ///
    /// Returns false if the path does not exist or nothing changed.
    pub fn set_muted(&mut self, kind: TrackKind, muted: bool) -> bool {
        if !self.tracks.contains(kind) || self.is_muted(kind) == muted {
            return false;
        }

        match kind {
            TrackKind::Audio => self.audio_muted = muted,
            TrackKind::Video => {
                self.video_muted = muted;
                if !muted {
                    // Frames decoded before the pause are stale references
                    if let Some(decoder) = self.video.as_mut() {
                        decoder.reset();
                    }
                }
            }
        }

        tracing::debug!(stream = %self.stream, track = %kind, muted = muted, "Track mute changed");
        true
    }

    /// Feed one packet through the pipeline
    pub fn process(&mut self, packet: &MediaPacket, events: &mut Vec<PipelineEvent>) {
        PipelineCounters::incr(&self.counters.packets_received, 1);
        PipelineCounters::incr(&self.counters.bytes_received, packet.size() as u64);

        if let Some(level) = self.quality.as_mut().and_then(QualityMonitor::on_received) {
            events.push(PipelineEvent::QualityChanged(level));
        }

        match packet.kind {
            TrackKind::Video => self.process_video(packet, events),
            TrackKind::Audio => self.process_audio(packet),
        }
    }

    fn process_video(&mut self, packet: &MediaPacket, events: &mut Vec<PipelineEvent>) {
        let muted = self.video_muted;
        let Some(decoder) = self.video.as_mut() else {
            PipelineCounters::incr(&self.counters.packets_discarded, 1);
            return;
        };

        // Headers keep the decoder configured while paused
        if muted && !packet.is_header {
            PipelineCounters::incr(&self.counters.packets_discarded, 1);
            return;
        }

        match decoder.decode(packet) {
            Ok(Some(frame)) => {
                PipelineCounters::incr(&self.counters.video_frames, 1);
                if frame.keyframe {
                    PipelineCounters::incr(&self.counters.keyframes, 1);
                }
                let presented = self
                    .gate
                    .deliver(|| self.render.present(frame))
                    .unwrap_or(false);
                if presented && !self.first_video {
                    self.first_video = true;
                    events.push(PipelineEvent::FirstVideoFrame);
                }
            }
            Ok(None) => {
                if !packet.is_header {
                    PipelineCounters::incr(&self.counters.packets_discarded, 1);
                }
            }
            Err(err) => {
                PipelineCounters::incr(&self.counters.decode_errors, 1);
                tracing::warn!(stream = %self.stream, error = %err, "Video decode error");
            }
        }
    }

    fn process_audio(&mut self, packet: &MediaPacket) {
        let muted = self.audio_muted;
        let Some(decoder) = self.audio.as_mut() else {
            PipelineCounters::incr(&self.counters.packets_discarded, 1);
            return;
        };

        if muted && !packet.is_header {
            PipelineCounters::incr(&self.counters.packets_discarded, 1);
            return;
        }

        match decoder.decode(packet) {
            Ok(Some(frame)) => {
                PipelineCounters::incr(&self.counters.audio_frames, 1);
                if let Some(sink) = &self.audio_sink {
                    // Nothing reaches the sink once the subscription closed
                    self.gate.deliver(|| sink.play(frame));
                }
            }
            Ok(None) => {
                if !packet.is_header {
                    PipelineCounters::incr(&self.counters.packets_discarded, 1);
                }
            }
            Err(err) => {
                PipelineCounters::incr(&self.counters.decode_errors, 1);
                tracing::warn!(stream = %self.stream, error = %err, "Audio decode error");
            }
        }
    }

    /// Account for packets the transport dropped
    pub fn on_lost(&mut self, count: u64, events: &mut Vec<PipelineEvent>) {
        PipelineCounters::incr(&self.counters.packets_lost, count);

        // The current group of pictures is broken; skip to the next keyframe
        if let Some(decoder) = self.video.as_mut() {
            decoder.reset();
        }

        if let Some(level) = self.quality.as_mut().and_then(|q| q.on_lost(count)) {
            events.push(PipelineEvent::QualityChanged(level));
        }

        tracing::debug!(stream = %self.stream, lost = count, "Packets lost");
    }

    /// Prepare for a feed opened on a new link
    pub fn on_resume(&mut self) {
        if let Some(decoder) = self.video.as_mut() {
            decoder.reset();
        }
    }

    /// Tell the transport which tracks and quality this feed wants
    pub async fn announce(&self, feed: FeedId, link: &dyn Link) {
        for kind in [TrackKind::Audio, TrackKind::Video] {
            let enabled = self.tracks.contains(kind) && !self.is_muted(kind);
            if let Err(err) = link
                .set_track_enabled(&self.stream, feed, kind, enabled)
                .await
            {
                tracing::warn!(stream = %self.stream, track = %kind, error = %err, "Failed to signal track intent");
            }
        }

        if let Some(level) = self.quality() {
            if let Err(err) = link.request_quality(&self.stream, feed, level).await {
                tracing::warn!(stream = %self.stream, error = %err, "Failed to request quality");
            }
        }
    }

    /// Decode a feed until it ends, the link goes away or the handle detaches
    pub async fn run<F>(
        &mut self,
        feed: &mut MediaFeed,
        link: &Arc<dyn Link>,
        commands: &mut mpsc::UnboundedReceiver<TrackCommand>,
        links: &mut LinkWatch,
        mut on_event: F,
    ) -> PipelineExit
    where
        F: FnMut(PipelineEvent),
    {
        let feed_id = feed.id();
        let mut events = Vec::new();

        loop {
            if self.gate.is_closed() {
                return PipelineExit::Detached;
            }

            tokio::select! {
                biased;

                _ = links.lost(link) => return PipelineExit::LinkLost,

                command = commands.recv() => match command {
                    Some(TrackCommand::SetMuted(kind, muted)) => {
                        if self.set_muted(kind, muted) {
                            if let Err(err) = link
                                .set_track_enabled(&self.stream, feed_id, kind, !muted)
                                .await
                            {
                                tracing::warn!(stream = %self.stream, track = %kind, error = %err, "Failed to signal mute");
                            }
                        }
                    }
                    None => return PipelineExit::Detached,
                },

                result = feed.recv() => match result {
                    Ok(packet) => self.process(&packet, &mut events),
                    Err(FeedError::Lagged(count)) => self.on_lost(count, &mut events),
                    Err(FeedError::Closed) => return PipelineExit::FeedClosed,
                },
            }

            for event in events.drain(..) {
                if let PipelineEvent::QualityChanged(level) = event {
                    tracing::info!(stream = %self.stream, quality = %level, "Quality changed");
                    if let Err(err) = link.request_quality(&self.stream, feed_id, level).await {
                        tracing::warn!(stream = %self.stream, error = %err, "Failed to request quality");
                    }
                }
                on_event(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    struct CollectingSink {
        frames: Mutex<Vec<AudioFrame>>,
    }

    impl AudioSink for CollectingSink {
        fn play(&self, frame: AudioFrame) {
            self.frames.lock().push(frame);
        }
    }

    fn pipeline(tracks: TrackSet, options: &SubscribeOptions) -> (MediaPipeline, Arc<RenderTarget>) {
        let render = Arc::new(RenderTarget::new());
        let pipeline = MediaPipeline::new(
            StreamId::new("cam"),
            tracks,
            options,
            Arc::clone(&render),
            Arc::new(PipelineCounters::new()),
            Arc::new(DeliveryGate::new()),
        );
        (pipeline, render)
    }

    fn both() -> TrackSet {
        TrackSet {
            audio: true,
            video: true,
        }
    }

    fn keyframe(ts: u32) -> MediaPacket {
        MediaPacket::video(ts, Bytes::from_static(&[0x65, 1, 2]), true)
    }

    fn inter(ts: u32) -> MediaPacket {
        MediaPacket::video(ts, Bytes::from_static(&[0x41, 3]), false)
    }

    #[test]
    fn test_first_video_frame_once() {
        let (mut pipeline, render) = pipeline(both(), &SubscribeOptions::default());
        let mut events = Vec::new();

        pipeline.process(&MediaPacket::video_header(640, 360), &mut events);
        pipeline.process(&inter(0), &mut events);
        assert!(events.is_empty());

        pipeline.process(&keyframe(33), &mut events);
        pipeline.process(&inter(66), &mut events);
        pipeline.process(&keyframe(99), &mut events);

        assert_eq!(events, vec![PipelineEvent::FirstVideoFrame]);
        assert_eq!(render.frames_rendered(), 3);
        assert_eq!(render.dimensions(), Some((640, 360)));

        let stats = pipeline.counters.snapshot();
        assert_eq!(stats.packets_received, 5);
        assert_eq!(stats.video_frames, 3);
        assert_eq!(stats.keyframes, 2);
        assert_eq!(stats.packets_discarded, 1);
    }

    #[test]
    fn test_disabled_video_path() {
        let tracks = TrackSet {
            audio: true,
            video: false,
        };
        let (mut pipeline, render) = pipeline(tracks, &SubscribeOptions::default());
        let mut events = Vec::new();

        pipeline.process(&MediaPacket::video_header(640, 360), &mut events);
        pipeline.process(&keyframe(0), &mut events);

        assert!(events.is_empty());
        assert_eq!(render.frames_rendered(), 0);
        // Muting can't create a path
        assert!(!pipeline.set_muted(TrackKind::Video, false));
        assert!(!pipeline.set_muted(TrackKind::Video, true));
    }

    #[test]
    fn test_mute_is_per_path() {
        let sink = Arc::new(CollectingSink::default());
        let options = SubscribeOptions::default().audio_sink(sink.clone());
        let (mut pipeline, render) = pipeline(both(), &options);
        let mut events = Vec::new();

        pipeline.process(&MediaPacket::audio_header(48_000, 2), &mut events);
        pipeline.process(&MediaPacket::video_header(320, 240), &mut events);
        pipeline.process(&keyframe(0), &mut events);

        assert!(pipeline.set_muted(TrackKind::Audio, true));
        assert!(!pipeline.set_muted(TrackKind::Audio, true));

        pipeline.process(&MediaPacket::audio(10, Bytes::from_static(&[9])), &mut events);
        pipeline.process(&inter(33), &mut events);
        assert!(sink.frames.lock().is_empty());
        assert_eq!(render.frames_rendered(), 2);

        assert!(pipeline.set_muted(TrackKind::Audio, false));
        pipeline.process(&MediaPacket::audio(20, Bytes::from_static(&[9])), &mut events);
        assert_eq!(sink.frames.lock().len(), 1);
        assert_eq!(sink.frames.lock()[0].sample_rate, 48_000);
    }

    #[test]
    fn test_video_unmute_waits_for_keyframe() {
        let (mut pipeline, render) = pipeline(both(), &SubscribeOptions::default());
        let mut events = Vec::new();

        pipeline.process(&MediaPacket::video_header(320, 240), &mut events);
        pipeline.process(&keyframe(0), &mut events);
        pipeline.set_muted(TrackKind::Video, true);
        pipeline.process(&inter(33), &mut events);
        pipeline.set_muted(TrackKind::Video, false);

        pipeline.process(&inter(66), &mut events);
        assert_eq!(render.frames_rendered(), 1);

        pipeline.process(&keyframe(99), &mut events);
        assert_eq!(render.frames_rendered(), 2);
    }

    #[test]
    fn test_loss_skips_to_keyframe() {
        let (mut pipeline, render) = pipeline(both(), &SubscribeOptions::default());
        let mut events = Vec::new();

        pipeline.process(&MediaPacket::video_header(320, 240), &mut events);
        pipeline.process(&keyframe(0), &mut events);
        pipeline.on_lost(4, &mut events);
        pipeline.process(&inter(200), &mut events);
        assert_eq!(render.frames_rendered(), 1);

        pipeline.process(&keyframe(233), &mut events);
        assert_eq!(render.frames_rendered(), 2);
        assert_eq!(pipeline.counters.snapshot().packets_lost, 4);
    }

    #[test]
    fn test_quality_follows_loss() {
        let options = SubscribeOptions::default()
            .adaptive_quality(true)
            .quality_window(10);
        let (mut pipeline, _render) = pipeline(both(), &options);
        let mut events = Vec::new();

        assert_eq!(pipeline.quality(), Some(QualityLevel::High));
        for ts in 0..7 {
            pipeline.process(&MediaPacket::audio(ts, Bytes::from_static(&[1])), &mut events);
        }
        pipeline.on_lost(3, &mut events);

        assert_eq!(events, vec![PipelineEvent::QualityChanged(QualityLevel::Medium)]);
        assert_eq!(pipeline.quality(), Some(QualityLevel::Medium));
    }

    #[test]
    fn test_no_quality_monitor_without_video() {
        let options = SubscribeOptions::default().adaptive_quality(true);
        let tracks = TrackSet {
            audio: true,
            video: false,
        };
        let (pipeline, _render) = pipeline(tracks, &options);
        assert_eq!(pipeline.quality(), None);
    }

    #[test]
    fn test_decode_error_counted() {
        let (mut pipeline, _render) = pipeline(both(), &SubscribeOptions::default());
        let mut events = Vec::new();

        let bad_header = MediaPacket {
            data: Bytes::from_static(&[0, 0, 0, 0]),
            ..MediaPacket::video_header(1, 1)
        };
        pipeline.process(&bad_header, &mut events);

        assert_eq!(pipeline.counters.snapshot().decode_errors, 1);
    }

    #[test]
    fn test_closed_gate_stops_media() {
        let sink = Arc::new(CollectingSink::default());
        let options = SubscribeOptions::default().audio_sink(sink.clone());
        let (mut pipeline, render) = pipeline(both(), &options);
        let mut events = Vec::new();

        pipeline.process(&MediaPacket::audio_header(48_000, 2), &mut events);
        pipeline.process(&MediaPacket::video_header(320, 240), &mut events);
        pipeline.process(&MediaPacket::audio(0, Bytes::from_static(&[7])), &mut events);
        assert_eq!(sink.frames.lock().len(), 1);

        assert!(pipeline.gate.close());
        pipeline.process(&MediaPacket::audio(10, Bytes::from_static(&[7])), &mut events);
        pipeline.process(&keyframe(33), &mut events);

        assert_eq!(sink.frames.lock().len(), 1);
        assert_eq!(render.frames_rendered(), 0);
        assert!(events.is_empty());
    }
}
