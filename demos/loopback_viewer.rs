//! Loopback viewer - subscribes to a synthetic stream through the in-process relay
//!
//! Run with: cargo run --example loopback_viewer [SECONDS]
//!
//! This example demonstrates:
//! - Publishing into a `Relay` and subscribing through a `Session`
//! - Observer callbacks for connect, first frame and link loss
//! - Reconnection after the relay drops every link
//! - Playback mute on an open subscription
//!
//! Set `RUST_LOG=media_subscriber=trace` for per-packet logs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use media_subscriber::media::{AudioFrame, AudioSink, MediaPacket};
use media_subscriber::relay::Relay;
use media_subscriber::{
    ErrorKind, QualityLevel, Session, SessionConfig, StreamDescriptor, StreamId,
    SubscribeOptions, SubscriberObserver, Subscription, TransportError,
};

/// Frame rate of the synthetic stream
const FPS: u32 = 30;

/// Keyframe every two seconds
const GOP_LENGTH: u32 = FPS * 2;

struct Viewer;

impl SubscriberObserver for Viewer {
    fn on_connected(&self, subscription: &Subscription) {
        println!(
            "[{}] Connected to '{}' ({})",
            subscription.id(),
            subscription.stream().name(),
            subscription.stream().id()
        );
    }

    fn on_failed(&self, subscription: &Subscription, error: ErrorKind) {
        println!("[{}] Failed: {}", subscription.id(), error);
    }

    fn on_first_video_frame(&self, subscription: &Subscription) {
        if let Some((width, height)) = subscription
            .render_target()
            .and_then(|target| target.dimensions())
        {
            println!("[{}] First frame: {}x{}", subscription.id(), width, height);
        }
    }

    fn on_disconnected(&self, subscription: &Subscription) {
        println!("[{}] Media interrupted", subscription.id());
    }

    fn on_reconnected(&self, subscription: &Subscription) {
        println!("[{}] Media resumed", subscription.id());
    }

    fn on_quality_changed(&self, subscription: &Subscription, level: QualityLevel) {
        println!("[{}] Quality: {}", subscription.id(), level);
    }
}

/// Counts decoded audio instead of playing it
#[derive(Default)]
struct NullSpeaker {
    samples: AtomicU64,
}

impl AudioSink for NullSpeaker {
    fn play(&self, frame: AudioFrame) {
        self.samples
            .fetch_add(frame.data.len() as u64, Ordering::Relaxed);
    }
}

/// Publish a synthetic 640x360 stream at `FPS` until `frames` have been sent
async fn publish(relay: Arc<Relay>, id: StreamId, frames: u32) {
    let interval = Duration::from_millis(1000 / FPS as u64);
    let mut ticker = tokio::time::interval(interval);

    for n in 0..frames {
        ticker.tick().await;
        let timestamp = n * 1000 / FPS;

        if n % GOP_LENGTH == 0 {
            let _ = relay.publish(&id, MediaPacket::video_header(640, 360)).await;
            let _ = relay
                .publish(&id, MediaPacket::audio_header(48_000, 2))
                .await;
        }

        let payload = Bytes::from(vec![(n % 251) as u8; 512]);
        let video = MediaPacket::video(timestamp, payload, n % GOP_LENGTH == 0);
        let audio = MediaPacket::audio(timestamp, Bytes::from_static(&[0u8; 64]));

        if relay.publish(&id, video).await.is_err() || relay.publish(&id, audio).await.is_err() {
            break;
        }
    }

    let _ = relay.end_stream(&id).await;
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let seconds: u32 = match std::env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => 6,
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("media_subscriber=info".parse()?),
        )
        .init();

    let relay = Arc::new(Relay::new());
    let _cleanup = relay.spawn_cleanup_task();

    let stream = StreamDescriptor::new("lobby-cam", true, true).with_name("Lobby camera");
    relay.register_stream(stream.clone()).await?;

    let session = Session::connect(Arc::new(relay.connector(None)), SessionConfig::default())?;
    session.wait_connected().await?;

    let viewer: Arc<dyn SubscriberObserver> = Arc::new(Viewer);
    let speaker = Arc::new(NullSpeaker::default());
    let options = SubscribeOptions::default()
        .adaptive_quality(true)
        .audio_sink(speaker.clone());
    let subscription = session.subscribe(stream.clone(), &viewer, options)?;

    let publisher = tokio::spawn(publish(
        Arc::clone(&relay),
        stream.id().clone(),
        seconds * FPS,
    ));

    tokio::time::sleep(Duration::from_secs(2)).await;
    println!("Dropping every link...");
    relay.sever_links(TransportError::ConnectionLost("demo".into()));

    tokio::time::sleep(Duration::from_secs(1)).await;
    println!("Muting audio for one second");
    subscription.set_audio_muted(true);
    tokio::time::sleep(Duration::from_secs(1)).await;
    subscription.set_audio_muted(false);

    publisher.await?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let stats = subscription.stats();
    println!(
        "Stats: packets={} lost={} discarded={} video={} keyframes={} audio={} bitrate={}bps audio_bytes={}",
        stats.packets_received,
        stats.packets_lost,
        stats.packets_discarded,
        stats.video_frames,
        stats.keyframes,
        stats.audio_frames,
        stats.bitrate,
        speaker.samples.load(Ordering::Relaxed),
    );

    session.close();
    Ok(())
}
