//! Transport session
//!
//! A session owns the link to the relay that all of its subscriptions share.
//! A single supervisor task connects, watches the link and reconnects; it is
//! the only writer of the connectivity state and of the current link. Both
//! are published through `watch` channels that subscriptions read.
//!
//! ```text
//!            Connecting ──► Connected ◄──────────────┐
//!                │              │ link lost          │
//!                │              ▼                    │
//!                │         Reconnecting ─────────────┘
//!                │              │ retries exhausted / permanent error
//!                ▼              ▼
//!             Failed ◄──────────┘        close() ──► Closed
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::stream::StreamDescriptor;
use crate::subscriber::controller::WeakSubscription;
use crate::subscriber::dispatch::CallbackContext;
use crate::subscriber::{SubscribeOptions, SubscriberObserver, Subscription, SubscriptionId};

use super::config::SessionConfig;
use super::link::{Connector, Link, TransportError};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    #[cfg(test)]
    pub(crate) fn for_test(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Connectivity of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectivityState {
    /// First connection attempt in progress
    Connecting,
    /// Link established
    Connected,
    /// Link lost, reconnecting
    Reconnecting {
        /// Current attempt (1-based)
        attempt: u32,
    },
    /// Gave up: permanent error or retries exhausted
    Failed(TransportError),
    /// Closed locally
    Closed,
}

impl ConnectivityState {
    /// Whether no further transition will happen
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectivityState::Failed(_) | ConnectivityState::Closed)
    }
}

/// State written by the supervisor, read by everyone else
struct TransportShared {
    session: SessionId,
    state: watch::Sender<ConnectivityState>,
    link: watch::Sender<Option<Arc<dyn Link>>>,
}

impl TransportShared {
    fn set_state(&self, state: ConnectivityState) {
        tracing::debug!(session = %self.session, state = ?state, "Connectivity changed");
        self.state.send_replace(state);
    }

    fn set_link(&self, link: Option<Arc<dyn Link>>) {
        self.link.send_replace(link);
    }
}

struct SessionInner {
    id: SessionId,
    config: SessionConfig,
    runtime: Handle,
    shared: Arc<TransportShared>,
    callbacks: CallbackContext,
    subscriptions: Mutex<HashMap<SubscriptionId, WeakSubscription>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    next_subscription_id: AtomicU64,
    closed: AtomicBool,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Some(supervisor) = self.supervisor.get_mut().take() {
            supervisor.abort();
        }
        // Drivers still watching must not keep the link alive
        self.shared.set_link(None);
        if !self.closed.load(Ordering::Acquire) {
            self.shared.set_state(ConnectivityState::Closed);
            tracing::info!(session = %self.id, "Session dropped");
        }
    }
}

/// A managed connection to a media relay
///
/// Cheap to clone; all clones refer to the same session. Open subscriptions
/// keep their session alive. Once every session and subscription handle is
/// gone the supervisor stops and the link is released.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Start a session
    ///
    /// Spawns the connection supervisor on the current tokio runtime and
    /// returns immediately; use [`wait_connected`](Self::wait_connected) or
    /// [`watch_state`](Self::watch_state) to follow progress.
    pub fn connect(connector: Arc<dyn Connector>, config: SessionConfig) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;
        let id = SessionId(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed));

        let (state, _) = watch::channel(ConnectivityState::Connecting);
        let (link, _) = watch::channel(None);
        let shared = Arc::new(TransportShared {
            session: id,
            state,
            link,
        });

        let callbacks = CallbackContext::spawn(&runtime, id);
        let supervisor = runtime.spawn(supervise(connector, config.clone(), Arc::clone(&shared)));

        tracing::info!(session = %id, "Session started");

        Ok(Self {
            inner: Arc::new(SessionInner {
                id,
                config,
                runtime,
                shared,
                callbacks,
                subscriptions: Mutex::new(HashMap::new()),
                supervisor: Mutex::new(Some(supervisor)),
                next_subscription_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Session ID
    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    /// Session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Current connectivity
    pub fn state(&self) -> ConnectivityState {
        self.inner.shared.state.borrow().clone()
    }

    /// Follow connectivity changes
    pub fn watch_state(&self) -> watch::Receiver<ConnectivityState> {
        self.inner.shared.state.subscribe()
    }

    /// Wait until the session is connected
    ///
    /// Fails if the session fails or is closed first.
    pub async fn wait_connected(&self) -> Result<()> {
        let mut rx = self.watch_state();
        loop {
            let state = rx.borrow_and_update().clone();
            match state {
                ConnectivityState::Connected => return Ok(()),
                ConnectivityState::Failed(err) => return Err(Error::Transport(err)),
                ConnectivityState::Closed => return Err(Error::SessionClosed),
                ConnectivityState::Connecting | ConnectivityState::Reconnecting { .. } => {}
            }
            if rx.changed().await.is_err() {
                return Err(Error::SessionClosed);
            }
        }
    }

    /// Subscribe to a stream
    ///
    /// See [`Subscription::create`].
    pub fn subscribe(
        &self,
        stream: StreamDescriptor,
        observer: &Arc<dyn SubscriberObserver>,
        options: SubscribeOptions,
    ) -> Result<Subscription> {
        Subscription::create(self, stream, observer, options)
    }

    /// Number of open subscriptions
    pub fn subscription_count(&self) -> usize {
        self.inner
            .subscriptions
            .lock()
            .values()
            .filter(|subscription| subscription.is_alive())
            .count()
    }

    /// Open subscriptions
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.inner
            .subscriptions
            .lock()
            .values()
            .filter_map(WeakSubscription::upgrade)
            .collect()
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Close every subscription and disconnect
    ///
    /// Idempotent.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let subscriptions: Vec<Subscription> = self
            .inner
            .subscriptions
            .lock()
            .drain()
            .filter_map(|(_, subscription)| subscription.upgrade())
            .collect();
        let count = subscriptions.len();
        for subscription in subscriptions {
            subscription.close();
        }

        if let Some(supervisor) = self.inner.supervisor.lock().take() {
            supervisor.abort();
        }
        self.inner.shared.set_link(None);
        self.inner.shared.set_state(ConnectivityState::Closed);

        tracing::info!(session = %self.inner.id, subscriptions = count, "Session closed");
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.inner.runtime
    }

    pub(crate) fn callbacks(&self) -> &CallbackContext {
        &self.inner.callbacks
    }

    pub(crate) fn link_watch(&self) -> LinkWatch {
        LinkWatch {
            rx: self.inner.shared.link.subscribe(),
        }
    }

    pub(crate) fn next_subscription_id(&self) -> SubscriptionId {
        SubscriptionId(self.inner.next_subscription_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Track a new subscription; false if the session is already closed
    pub(crate) fn register(&self, subscription: &Subscription) -> bool {
        let mut subscriptions = self.inner.subscriptions.lock();
        if self.is_closed() {
            return false;
        }
        subscriptions.insert(subscription.id(), subscription.downgrade());
        true
    }

    pub(crate) fn unregister(&self, id: SubscriptionId) {
        self.inner.subscriptions.lock().remove(&id);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Read-only view of the session's current link
pub(crate) struct LinkWatch {
    rx: watch::Receiver<Option<Arc<dyn Link>>>,
}

impl LinkWatch {
    /// The current link, if connected
    pub fn current(&mut self) -> Option<Arc<dyn Link>> {
        self.rx.borrow_and_update().clone()
    }

    /// Wait for the link to change; false if the session is gone
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// Resolves once `link` is no longer the session's link
    pub async fn lost(&mut self, link: &Arc<dyn Link>) {
        loop {
            let current = self.rx.borrow_and_update().as_ref().map(|l| l.id());
            if current != Some(link.id()) {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

async fn supervise(
    connector: Arc<dyn Connector>,
    config: SessionConfig,
    shared: Arc<TransportShared>,
) {
    let session = shared.session;
    let mut reconnecting = false;

    loop {
        let link = match establish(connector.as_ref(), &config, &shared, reconnecting).await {
            Ok(link) => link,
            Err(err) => {
                tracing::warn!(session = %session, error = %err, "Session failed");
                shared.set_state(ConnectivityState::Failed(err));
                return;
            }
        };

        tracing::info!(session = %session, link = link.id(), "Session connected");
        shared.set_link(Some(Arc::clone(&link)));
        shared.set_state(ConnectivityState::Connected);

        let err = link.closed().await;
        shared.set_link(None);

        if err.is_permanent() {
            tracing::warn!(session = %session, error = %err, "Link closed permanently");
            shared.set_state(ConnectivityState::Failed(err));
            return;
        }

        tracing::warn!(session = %session, error = %err, "Link lost, reconnecting");
        reconnecting = true;
        shared.set_state(ConnectivityState::Reconnecting { attempt: 1 });
    }
}

/// Connect with bounded backoff
async fn establish(
    connector: &dyn Connector,
    config: &SessionConfig,
    shared: &TransportShared,
    reconnecting: bool,
) -> std::result::Result<Arc<dyn Link>, TransportError> {
    let policy = &config.retry;
    let mut attempt = 1;

    loop {
        let result = match tokio::time::timeout(config.connect_timeout, connector.connect()).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        };

        let err = match result {
            Ok(link) => return Ok(link),
            Err(err) => err,
        };

        if err.is_permanent() || attempt >= policy.max_attempts {
            return Err(err);
        }

        let delay = policy.delay_for(attempt);
        tracing::debug!(
            session = %shared.session,
            attempt = attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Connection attempt failed, backing off"
        );

        attempt += 1;
        if reconnecting {
            shared.set_state(ConnectivityState::Reconnecting { attempt });
        }
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::relay::Relay;
    use crate::transport::RetryPolicy;

    fn fast_retry(attempts: u32) -> SessionConfig {
        SessionConfig::default().retry(
            RetryPolicy::default()
                .max_attempts(attempts)
                .initial_delay(Duration::from_millis(10)),
        )
    }

    #[tokio::test]
    async fn test_connect() {
        let relay = Arc::new(Relay::new());
        let session = Session::connect(Arc::new(relay.connector(None)), SessionConfig::default())
            .unwrap();

        assert_ok!(session.wait_connected().await);
        assert_eq!(session.state(), ConnectivityState::Connected);
        assert_eq!(relay.link_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_retried() {
        let relay = Arc::new(Relay::new());
        relay.fail_next_connects(2, TransportError::Refused("busy".into()));

        let session = Session::connect(Arc::new(relay.connector(None)), fast_retry(3)).unwrap();

        assert_ok!(session.wait_connected().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let relay = Arc::new(Relay::new());
        relay.fail_next_connects(3, TransportError::Refused("busy".into()));

        let session = Session::connect(Arc::new(relay.connector(None)), fast_retry(3)).unwrap();

        let err = assert_err!(session.wait_connected().await);
        assert!(matches!(
            err,
            Error::Transport(TransportError::Refused(_))
        ));
        assert!(session.state().is_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthorized_not_retried() {
        let relay = Arc::new(Relay::new());
        relay.require_token("secret");
        // Would succeed on a retry, but unauthorized must not be retried
        let session =
            Session::connect(Arc::new(relay.connector(Some("wrong".into()))), fast_retry(5))
                .unwrap();

        let err = assert_err!(session.wait_connected().await);
        assert!(matches!(
            err,
            Error::Transport(TransportError::Unauthorized(_))
        ));
        assert_eq!(relay.connect_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_after_link_loss() {
        let relay = Arc::new(Relay::new());
        let session = Session::connect(Arc::new(relay.connector(None)), fast_retry(3)).unwrap();
        session.wait_connected().await.unwrap();

        let mut states = session.watch_state();
        states.borrow_and_update();

        // First reconnect attempt fails, so the backoff is observable
        relay.fail_next_connects(1, TransportError::Refused("restarting".into()));
        relay.sever_links(TransportError::ConnectionLost("reset".into()));

        states.changed().await.unwrap();
        assert_eq!(
            *states.borrow_and_update(),
            ConnectivityState::Reconnecting { attempt: 2 }
        );

        assert_ok!(session.wait_connected().await);
        assert_eq!(relay.connect_attempts(), 3);
        assert_eq!(relay.link_count(), 1);
    }

    #[tokio::test]
    async fn test_close() {
        let relay = Arc::new(Relay::new());
        let session = Session::connect(Arc::new(relay.connector(None)), SessionConfig::default())
            .unwrap();
        session.wait_connected().await.unwrap();

        session.close();
        session.close();

        assert_eq!(session.state(), ConnectivityState::Closed);
        assert!(session.is_closed());
        assert!(matches!(
            session.wait_connected().await,
            Err(Error::SessionClosed)
        ));
    }

    #[test]
    fn test_connect_outside_runtime() {
        let relay = Arc::new(Relay::new());
        let result = Session::connect(Arc::new(relay.connector(None)), SessionConfig::default());

        assert!(matches!(result, Err(Error::NoRuntime)));
    }
}
