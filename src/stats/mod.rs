//! Statistics and metrics

pub mod metrics;

pub(crate) use metrics::PipelineCounters;
pub use metrics::SubscriberStats;
