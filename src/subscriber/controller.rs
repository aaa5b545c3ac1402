//! Subscription controller
//!
//! A [`Subscription`] is a cheap handle over shared state. Its driver task
//! binds the stream on the session's link, runs the decode pipeline and
//! reopens the stream when the link is replaced. The driver is the only
//! source of observer events; they are queued on the session's callback
//! context and filtered through the subscription's delivery gate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::{Error, ErrorKind, Result};
use crate::media::{
    MediaPipeline, PipelineEvent, PipelineExit, RenderTarget, TrackCommand, TrackKind,
};
use crate::stats::{PipelineCounters, SubscriberStats};
use crate::stream::{StreamBinding, StreamDescriptor, StreamId, TrackSet};
use crate::transport::{ConnectivityState, Link, LinkWatch, MediaFeed, RetryPolicy, Session};

use super::dispatch::DeliveryGate;
use super::observer::{SubscriberEvent, SubscriberObserver};
use super::options::SubscribeOptions;
use super::state::{StateMachine, SubscriptionState};

/// Unique subscription identifier within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub(crate) u64);

impl SubscriptionId {
    /// Numeric value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Inner {
    id: SubscriptionId,
    session: Session,
    binding: StreamBinding,
    options: SubscribeOptions,
    observer: Weak<dyn SubscriberObserver>,
    state: Mutex<StateMachine>,
    gate: Arc<DeliveryGate>,
    render: Arc<RenderTarget>,
    counters: Arc<PipelineCounters>,
    commands: mpsc::UnboundedSender<TrackCommand>,
    audio_muted: AtomicBool,
    video_muted: AtomicBool,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if !self.gate.close() {
            return;
        }

        self.state.get_mut().close();
        if let Some(driver) = self.driver.get_mut().take() {
            driver.abort();
        }
        self.render.detach();
        self.session.unregister(self.id);

        tracing::debug!(subscription = %self.id, "Subscription dropped without close");
    }
}

/// A remote stream bound to a session
///
/// Cheap to clone; all clones refer to the same subscription. A subscription
/// stays registered with its session until [`close`](Self::close) is called
/// or its last handle is dropped. Dropping closes it without a final
/// callback; the session and the driver task only hold it weakly.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<Inner>,
}

impl Subscription {
    /// Create a subscription and start connecting
    ///
    /// Returns an error only for malformed input or a closed session.
    /// Connection failures are reported through
    /// [`SubscriberObserver::on_failed`].
    pub fn create(
        session: &Session,
        stream: StreamDescriptor,
        observer: &Arc<dyn SubscriberObserver>,
        options: SubscribeOptions,
    ) -> Result<Self> {
        if session.is_closed() {
            return Err(Error::SessionClosed);
        }

        let binding = StreamBinding::resolve(stream, &options)?;
        let (commands, command_rx) = mpsc::unbounded_channel();

        let subscription = Self {
            inner: Arc::new(Inner {
                id: session.next_subscription_id(),
                session: session.clone(),
                binding,
                options,
                observer: Arc::downgrade(observer),
                state: Mutex::new(StateMachine::new()),
                gate: Arc::new(DeliveryGate::new()),
                render: Arc::new(RenderTarget::new()),
                counters: Arc::new(PipelineCounters::new()),
                commands,
                audio_muted: AtomicBool::new(false),
                video_muted: AtomicBool::new(false),
                driver: Mutex::new(None),
            }),
        };

        if !session.register(&subscription) {
            return Err(Error::SessionClosed);
        }

        let tracks = subscription.tracks();
        tracing::info!(
            session = %session.id(),
            subscription = %subscription.id(),
            stream = %subscription.stream().id(),
            audio = tracks.audio,
            video = tracks.video,
            "Subscription created"
        );

        let driver = session
            .runtime()
            .spawn(drive(subscription.downgrade(), command_rx));
        *subscription.inner.driver.lock() = Some(driver);

        // Closed concurrently before the driver was stored
        if subscription.inner.gate.is_closed() {
            if let Some(driver) = subscription.inner.driver.lock().take() {
                driver.abort();
            }
        }

        Ok(subscription)
    }

    /// Subscription ID
    pub fn id(&self) -> SubscriptionId {
        self.inner.id
    }

    /// Session this subscription belongs to
    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    /// The bound stream
    pub fn stream(&self) -> &StreamDescriptor {
        self.inner.binding.descriptor()
    }

    /// Tracks decoded by this subscription
    pub fn tracks(&self) -> TrackSet {
        self.inner.binding.tracks()
    }

    /// Options the subscription was created with
    pub fn options(&self) -> &SubscribeOptions {
        &self.inner.options
    }

    /// Current state
    pub fn state(&self) -> SubscriptionState {
        self.inner.state.lock().state()
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().is_closed()
    }

    /// Whether media is currently flowing
    ///
    /// False before connecting, while the transport recovers from a lost
    /// link and once media has ended.
    pub fn is_media_active(&self) -> bool {
        self.inner.state.lock().is_media_active()
    }

    /// Whether media stopped for good
    ///
    /// Set when the remote stream ended, or when the stream could not be
    /// reopened after the link was lost. The state stays
    /// [`Connected`](SubscriptionState::Connected) or
    /// [`VideoReady`](SubscriptionState::VideoReady).
    pub fn is_media_ended(&self) -> bool {
        self.inner.state.lock().is_media_ended()
    }

    /// Render target for decoded video, until the subscription is closed
    pub fn render_target(&self) -> Option<Arc<RenderTarget>> {
        if self.is_closed() {
            return None;
        }
        Some(Arc::clone(&self.inner.render))
    }

    /// Media statistics
    pub fn stats(&self) -> SubscriberStats {
        self.inner.counters.snapshot()
    }

    /// Pause or resume audio playback
    ///
    /// Only affects a path enabled when the subscription was created.
    /// Returns false if there is no audio path or the subscription is closed.
    pub fn set_audio_muted(&self, muted: bool) -> bool {
        self.set_muted(TrackKind::Audio, muted)
    }

    /// Pause or resume video rendering
    ///
    /// Only affects a path enabled when the subscription was created.
    /// Returns false if there is no video path or the subscription is closed.
    pub fn set_video_muted(&self, muted: bool) -> bool {
        self.set_muted(TrackKind::Video, muted)
    }

    /// Whether audio playback is paused
    pub fn is_audio_muted(&self) -> bool {
        self.inner.audio_muted.load(Ordering::Acquire)
    }

    /// Whether video rendering is paused
    pub fn is_video_muted(&self) -> bool {
        self.inner.video_muted.load(Ordering::Acquire)
    }

    fn set_muted(&self, kind: TrackKind, muted: bool) -> bool {
        if self.is_closed() || !self.tracks().contains(kind) {
            return false;
        }

        if self
            .inner
            .commands
            .send(TrackCommand::SetMuted(kind, muted))
            .is_err()
        {
            return false;
        }

        let flag = match kind {
            TrackKind::Audio => &self.inner.audio_muted,
            TrackKind::Video => &self.inner.video_muted,
        };
        flag.store(muted, Ordering::Release);
        true
    }

    /// Close the subscription
    ///
    /// Stops decoding, detaches the render target and removes the
    /// subscription from its session. No observer callback is delivered
    /// after this returns. Idempotent; may be called from inside a callback.
    pub fn close(&self) {
        if !self.inner.gate.close() {
            return;
        }

        self.inner.state.lock().close();

        if let Some(driver) = self.inner.driver.lock().take() {
            driver.abort();
        }
        self.inner.render.detach();
        self.inner.session.unregister(self.inner.id);

        let stats = self.stats();
        tracing::info!(
            subscription = %self.inner.id,
            stream = %self.stream().id(),
            state = %self.state(),
            packets = stats.packets_received,
            video_frames = stats.video_frames,
            "Subscription closed"
        );
    }

    pub(crate) fn downgrade(&self) -> WeakSubscription {
        WeakSubscription(Arc::downgrade(&self.inner))
    }

    fn emit(&self, event: SubscriberEvent) {
        let subscription = self.clone();
        self.inner.session.callbacks().post(move || {
            let Some(observer) = subscription.inner.observer.upgrade() else {
                return;
            };
            subscription
                .inner
                .gate
                .deliver(|| event.deliver(observer.as_ref(), &subscription));
        });
    }

    fn fail(&self, kind: ErrorKind) {
        if self.inner.state.lock().on_failed(kind) {
            tracing::warn!(
                subscription = %self.inner.id,
                stream = %self.stream().id(),
                error = %kind,
                "Subscription failed"
            );
            self.emit(SubscriberEvent::Failed(kind));
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.inner.id)
            .field("stream", self.stream().id())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Non-owning handle, held by the session registry and the driver task
#[derive(Clone)]
pub(crate) struct WeakSubscription(Weak<Inner>);

impl WeakSubscription {
    pub fn upgrade(&self) -> Option<Subscription> {
        self.0.upgrade().map(|inner| Subscription { inner })
    }

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

/// Wait for a link and open the stream on it
///
/// Transient open errors are retried with `retry` backoff on the same link;
/// the count restarts when the link is replaced.
async fn open_feed(
    stream: &StreamId,
    links: &mut LinkWatch,
    session_state: &mut watch::Receiver<ConnectivityState>,
    retry: &RetryPolicy,
) -> std::result::Result<(Arc<dyn Link>, MediaFeed), ErrorKind> {
    let mut attempt = 0;

    loop {
        match &*session_state.borrow_and_update() {
            ConnectivityState::Failed(err) => return Err(ErrorKind::from_transport(err)),
            ConnectivityState::Closed => return Err(ErrorKind::ConnectionFailed),
            _ => {}
        }

        if let Some(link) = links.current() {
            match link.open_stream(stream).await {
                Ok(feed) => return Ok((link, feed)),
                Err(err) if err.is_permanent() => return Err(ErrorKind::from_transport(&err)),
                Err(err) => {
                    attempt += 1;
                    if attempt >= retry.max_attempts {
                        return Err(ErrorKind::from_transport(&err));
                    }

                    let delay = retry.delay_for(attempt);
                    tracing::debug!(
                        stream = %stream,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Open failed, retrying"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = links.lost(&link) => attempt = 0,
                        changed = session_state.changed() => {
                            if changed.is_err() {
                                return Err(ErrorKind::ConnectionFailed);
                            }
                        }
                    }
                    continue;
                }
            }
        }

        tokio::select! {
            changed = links.changed() => {
                if !changed {
                    return Err(ErrorKind::ConnectionFailed);
                }
            }
            changed = session_state.changed() => {
                if changed.is_err() {
                    return Err(ErrorKind::ConnectionFailed);
                }
            }
        }
    }
}

/// Driver task of one subscription
///
/// Holds the subscription weakly and upgrades only to report progress, so
/// dropping the last handle ends the task.
async fn drive(handle: WeakSubscription, mut commands: mpsc::UnboundedReceiver<TrackCommand>) {
    let Some(subscription) = handle.upgrade() else {
        return;
    };
    let id = subscription.id();
    let stream = subscription.stream().id().clone();
    let connect_timeout = subscription.inner.options.connect_timeout;
    let retry = subscription.session().config().retry.clone();
    let mut links = subscription.session().link_watch();
    let mut session_state = subscription.session().watch_state();
    let mut pipeline = MediaPipeline::new(
        stream.clone(),
        subscription.tracks(),
        &subscription.inner.options,
        Arc::clone(&subscription.inner.render),
        Arc::clone(&subscription.inner.counters),
        Arc::clone(&subscription.inner.gate),
    );
    drop(subscription);

    let attempt = open_feed(&stream, &mut links, &mut session_state, &retry);
    let mut opened = match tokio::time::timeout(connect_timeout, attempt).await {
        Ok(Ok(opened)) => opened,
        Ok(Err(kind)) => {
            if let Some(subscription) = handle.upgrade() {
                subscription.fail(kind);
            }
            return;
        }
        Err(_) => {
            tracing::debug!(subscription = %id, stream = %stream, "Connect timed out");
            if let Some(subscription) = handle.upgrade() {
                subscription.fail(ErrorKind::ConnectionFailed);
            }
            return;
        }
    };

    {
        let Some(subscription) = handle.upgrade() else {
            return;
        };
        let latency = {
            let mut state = subscription.inner.state.lock();
            if !state.on_connected() {
                return;
            }
            state.connect_latency().unwrap_or_default()
        };
        tracing::info!(
            subscription = %id,
            stream = %stream,
            link = opened.0.id(),
            feed = %opened.1.id(),
            latency_ms = latency.as_millis() as u64,
            "Subscription connected"
        );
        subscription.emit(SubscriberEvent::Connected);
    }

    loop {
        let (link, mut feed) = opened;
        pipeline.announce(feed.id(), link.as_ref()).await;

        let exit = pipeline
            .run(&mut feed, &link, &mut commands, &mut links, |event| {
                let Some(subscription) = handle.upgrade() else {
                    return;
                };
                match event {
                    PipelineEvent::FirstVideoFrame => {
                        if subscription.inner.state.lock().on_video_ready() {
                            tracing::debug!(subscription = %id, "First video frame");
                            subscription.emit(SubscriberEvent::FirstVideoFrame);
                        }
                    }
                    PipelineEvent::QualityChanged(level) => {
                        subscription.emit(SubscriberEvent::QualityChanged(level));
                    }
                }
            })
            .await;
        drop(feed);

        let stream_ended = match exit {
            PipelineExit::Detached => return,
            PipelineExit::FeedClosed => {
                links.current().map(|current| current.id()) == Some(link.id())
            }
            PipelineExit::LinkLost => false,
        };

        {
            let Some(subscription) = handle.upgrade() else {
                return;
            };
            {
                let mut state = subscription.inner.state.lock();
                state.on_media_interrupted();
                if stream_ended {
                    state.on_media_ended();
                }
            }
            subscription.emit(SubscriberEvent::Disconnected);
        }

        if stream_ended {
            tracing::info!(subscription = %id, stream = %stream, "Remote stream ended");
            return;
        }
        tracing::warn!(subscription = %id, stream = %stream, link = link.id(), "Link lost");
        drop(link);

        opened = match open_feed(&stream, &mut links, &mut session_state, &retry).await {
            Ok(opened) => opened,
            Err(kind) => {
                tracing::warn!(subscription = %id, stream = %stream, error = %kind, "Media not resumed");
                if let Some(subscription) = handle.upgrade() {
                    subscription.inner.state.lock().on_media_ended();
                }
                return;
            }
        };

        pipeline.on_resume();
        let Some(subscription) = handle.upgrade() else {
            return;
        };
        if !subscription.inner.state.lock().on_media_resumed() {
            return;
        }
        tracing::info!(subscription = %id, stream = %stream, link = opened.0.id(), "Subscription resumed");
        subscription.emit(SubscriberEvent::Reconnected);
    }
}
