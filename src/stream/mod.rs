//! Remote stream identity and binding
//!
//! A [`StreamDescriptor`] describes a remote stream and what media it
//! carries. A [`StreamBinding`] freezes those capabilities, combined with the
//! subscriber's options, into the set of tracks a subscription decodes.

pub mod binding;
pub mod descriptor;

pub use binding::{StreamBinding, TrackSet};
pub use descriptor::{StreamDescriptor, StreamId};
