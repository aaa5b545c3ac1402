//! In-process media relay
//!
//! The relay keeps the streams that publishers push into it and serves them
//! to sessions through [`RelayConnector`], an implementation of the
//! [`Connector`](crate::Connector) seam. It uses `tokio::sync::broadcast` for
//! zero-copy fan-out to every open feed.
//!
//! # Architecture
//!
//! ```text
//!                            Arc<Relay>
//!                     ┌─────────────────────────┐
//!                     │ streams: HashMap<Id,    │
//!                     │   StreamEntry {         │
//!                     │     gop_buffer,         │
//!                     │     tx: broadcast::Tx,  │
//!                     │     feeds,              │
//!                     │   }                     │
//!                     │ >                       │
//!                     │ links, access, faults   │
//!                     └───────────┬─────────────┘
//!                                 │
//!         ┌───────────────────────┼───────────────────────┐
//!         │                       │                       │
//!         ▼                       ▼                       ▼
//!    [Publisher]             [RelayLink]             [RelayLink]
//!    relay.publish()         MediaFeed::recv()       MediaFeed::recv()
//!                                 │                       │
//!                                 └──► Subscription pipelines
//! ```
//!
//! A late joiner first receives the cached sequence headers and the current
//! group of pictures, then live packets.
//!
//! # Fault injection
//!
//! [`Relay::fail_next_connects`], [`Relay::fail_next_opens`] and
//! [`Relay::sever_links`] let tests drive sessions and subscriptions through
//! their retry and reconnect paths.

pub mod config;
pub mod connector;
pub mod entry;
pub mod error;
pub mod store;

pub use config::RelayConfig;
pub use connector::{RelayConnector, RelayLink};
pub use entry::{RelayStreamStats, StreamEntry, StreamState, TrackIntent};
pub use error::RelayError;
pub use store::{AccessPolicy, Relay};
