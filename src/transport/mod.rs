//! Connection to the media relay
//!
//! - [`link`]: the transport seam ([`Connector`], [`Link`], [`MediaFeed`])
//! - [`session`]: connection supervision with bounded reconnect
//! - [`config`]: timeouts and backoff

pub mod config;
pub mod link;
pub mod session;

pub use config::{RetryPolicy, SessionConfig};
pub use link::{Connector, FeedError, FeedId, Link, MediaFeed, TransportError};
pub(crate) use session::LinkWatch;
pub use session::{ConnectivityState, Session, SessionId};
