//! Subscriber observer

use crate::error::ErrorKind;
use crate::media::QualityLevel;

use super::controller::Subscription;

/// Receives lifecycle events of a subscription
///
/// Callbacks run on the session's callback context, one at a time and in
/// causal order. Exactly one of [`on_connected`](Self::on_connected) and
/// [`on_failed`](Self::on_failed) is delivered, before anything else. No
/// callback is delivered after [`Subscription::close`] returns; calling it
/// from inside a callback is allowed.
///
/// Subscriptions hold their observer weakly. Events for a dropped observer
/// are discarded.
pub trait SubscriberObserver: Send + Sync + 'static {
    /// The subscription is bound to its stream
    fn on_connected(&self, subscription: &Subscription);

    /// The connection attempt failed; the subscription is terminal
    fn on_failed(&self, subscription: &Subscription, error: ErrorKind);

    /// The first video frame has been decoded and rendered
    ///
    /// Delivered at most once, never if the video path is disabled.
    fn on_first_video_frame(&self, _subscription: &Subscription) {}

    /// Media stopped: the transport dropped or the remote stream ended
    ///
    /// The subscription stays connected. If no
    /// [`on_reconnected`](Self::on_reconnected) follows, media is over for
    /// good; [`Subscription::is_media_ended`] reports that once the
    /// subscription has given up.
    fn on_disconnected(&self, _subscription: &Subscription) {}

    /// Media resumed after the transport recovered
    fn on_reconnected(&self, _subscription: &Subscription) {}

    /// Adaptive quality moved to another level
    fn on_quality_changed(&self, _subscription: &Subscription, _level: QualityLevel) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SubscriberEvent {
    Connected,
    Failed(ErrorKind),
    FirstVideoFrame,
    Disconnected,
    Reconnected,
    QualityChanged(QualityLevel),
}

impl SubscriberEvent {
    pub fn deliver(self, observer: &dyn SubscriberObserver, subscription: &Subscription) {
        match self {
            SubscriberEvent::Connected => observer.on_connected(subscription),
            SubscriberEvent::Failed(kind) => observer.on_failed(subscription, kind),
            SubscriberEvent::FirstVideoFrame => observer.on_first_video_frame(subscription),
            SubscriberEvent::Disconnected => observer.on_disconnected(subscription),
            SubscriberEvent::Reconnected => observer.on_reconnected(subscription),
            SubscriberEvent::QualityChanged(level) => {
                observer.on_quality_changed(subscription, level)
            }
        }
    }
}
