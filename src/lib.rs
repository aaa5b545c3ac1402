//! # media-subscriber
//!
//! Subscribe to remote audio/video streams over a managed real-time session.
//!
//! A [`Session`] owns the connection to a media relay and keeps it alive with
//! bounded reconnection. A [`Subscription`] binds one remote stream to the
//! session, decodes its media into a [`RenderTarget`] and reports its
//! lifecycle to a [`SubscriberObserver`].
//!
//! The transport protocol is reached through the [`Connector`] and [`Link`]
//! traits. The [`relay`] module provides an in-process implementation useful
//! for local loopback and tests.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use media_subscriber::relay::Relay;
//! use media_subscriber::{
//!     Session, SessionConfig, StreamDescriptor, SubscribeOptions, SubscriberObserver,
//!     Subscription,
//! };
//!
//! struct Logger;
//!
//! impl SubscriberObserver for Logger {
//!     fn on_connected(&self, subscription: &Subscription) {
//!         println!("connected to {}", subscription.stream().id());
//!     }
//!
//!     fn on_failed(&self, _subscription: &Subscription, error: media_subscriber::ErrorKind) {
//!         println!("failed: {}", error);
//!     }
//! }
//!
//! # async fn example() -> media_subscriber::Result<()> {
//! let relay = Arc::new(Relay::new());
//! let stream = StreamDescriptor::new("camera-1", true, true);
//! relay.register_stream(stream.clone()).await.ok();
//!
//! let session = Session::connect(Arc::new(relay.connector(None)), SessionConfig::default())?;
//! let observer: Arc<dyn SubscriberObserver> = Arc::new(Logger);
//! let subscription = session.subscribe(stream, &observer, SubscribeOptions::default())?;
//!
//! // ... later
//! subscription.close();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod media;
pub mod relay;
pub mod stats;
pub mod stream;
pub mod subscriber;
pub mod transport;

pub use error::{Error, ErrorKind, Result};
pub use media::{QualityLevel, RenderTarget, TrackKind};
pub use stream::{StreamDescriptor, StreamId};
pub use subscriber::{
    SubscribeOptions, SubscriberObserver, Subscription, SubscriptionId, SubscriptionState,
};
pub use transport::{
    ConnectivityState, Connector, Link, RetryPolicy, Session, SessionConfig, TransportError,
};
