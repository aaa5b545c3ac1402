//! Subscription state machine
//!
//! ```text
//! Connecting ──► Connected ──► VideoReady
//!     │              │              │
//!     ▼              └──────┬───────┘
//!   Failed                  ▼
//!                         Closed
//! ```
//!
//! `Failed` and `Closed` are terminal. Closing a failed subscription releases
//! it but keeps the failure visible.
//!
//! Media flow is tracked beside the state: a connected subscription whose
//! link dropped stays `Connected` while media is interrupted, and is marked
//! ended once the stream finished or could not be reopened.

use std::time::Instant;

use crate::error::ErrorKind;

/// Lifecycle state of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Connection attempt in progress
    Connecting,
    /// Bound to the remote stream
    Connected,
    /// First video frame decoded
    VideoReady,
    /// Connection attempt failed
    Failed(ErrorKind),
    /// Closed locally
    Closed,
}

impl SubscriptionState {
    /// Whether no further transition can happen
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubscriptionState::Failed(_) | SubscriptionState::Closed)
    }

    /// Whether the subscription is bound to its stream
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            SubscriptionState::Connected | SubscriptionState::VideoReady
        )
    }
}

impl std::fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriptionState::Connecting => write!(f, "connecting"),
            SubscriptionState::Connected => write!(f, "connected"),
            SubscriptionState::VideoReady => write!(f, "video-ready"),
            SubscriptionState::Failed(kind) => write!(f, "failed ({})", kind),
            SubscriptionState::Closed => write!(f, "closed"),
        }
    }
}

/// Guarded transitions
///
/// Every method returns whether the transition happened, so callers emit
/// the matching observer event at most once.
#[derive(Debug)]
pub(crate) struct StateMachine {
    state: SubscriptionState,
    closed: bool,
    media_active: bool,
    media_ended: bool,
    created_at: Instant,
    connected_at: Option<Instant>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: SubscriptionState::Connecting,
            closed: false,
            media_active: false,
            media_ended: false,
            created_at: Instant::now(),
            connected_at: None,
        }
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Time from creation to connection
    pub fn connect_latency(&self) -> Option<std::time::Duration> {
        self.connected_at.map(|at| at - self.created_at)
    }

    pub fn on_connected(&mut self) -> bool {
        if self.closed || self.state != SubscriptionState::Connecting {
            return false;
        }
        self.state = SubscriptionState::Connected;
        self.media_active = true;
        self.connected_at = Some(Instant::now());
        true
    }

    /// Media is flowing from the remote stream
    pub fn is_media_active(&self) -> bool {
        self.media_active && !self.closed
    }

    /// Media will not resume
    pub fn is_media_ended(&self) -> bool {
        self.media_ended
    }

    pub fn on_media_interrupted(&mut self) -> bool {
        if self.closed || !self.media_active {
            return false;
        }
        self.media_active = false;
        true
    }

    pub fn on_media_resumed(&mut self) -> bool {
        if self.closed || self.media_ended || !self.state.is_connected() {
            return false;
        }
        self.media_active = true;
        true
    }

    pub fn on_media_ended(&mut self) -> bool {
        if self.media_ended || !self.state.is_connected() {
            return false;
        }
        self.media_active = false;
        self.media_ended = true;
        true
    }

    pub fn on_failed(&mut self, kind: ErrorKind) -> bool {
        if self.closed || self.state != SubscriptionState::Connecting {
            return false;
        }
        self.state = SubscriptionState::Failed(kind);
        true
    }

    pub fn on_video_ready(&mut self) -> bool {
        if self.closed || self.state != SubscriptionState::Connected {
            return false;
        }
        self.state = SubscriptionState::VideoReady;
        true
    }

    /// Returns false if already closed
    pub fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        if !matches!(self.state, SubscriptionState::Failed(_)) {
            self.state = SubscriptionState::Closed;
        }
        true
    }
}
