//! Subscriptions to remote streams
//!
//! A subscription moves through [`SubscriptionState`]s while its driver task
//! connects and decodes. Events reach the application through a
//! [`SubscriberObserver`], delivered serially on the session's callback
//! context.

pub mod controller;
pub(crate) mod dispatch;
pub mod observer;
pub mod options;
pub mod state;


pub use controller::{Subscription, SubscriptionId};
pub use observer::SubscriberObserver;
pub use options::SubscribeOptions;
pub use state::SubscriptionState;
