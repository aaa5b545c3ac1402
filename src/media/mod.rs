//! Media handling for subscriptions
//!
//! This module provides:
//! - Media packet types delivered by the transport
//! - GOP buffering for late-joiner support
//! - Header/keyframe-gated decoders
//! - Adaptive quality from observed packet loss
//! - The render target and the per-subscription decode pipeline

pub mod decoder;
pub mod gop;
pub mod packet;
pub mod pipeline;
pub mod quality;
pub mod render;

pub use decoder::{AudioDecoder, AudioFrame, DecodeError, Decoder, VideoDecoder, VideoFrame};
pub use gop::GopBuffer;
pub use packet::{MediaPacket, TrackKind};
pub use pipeline::AudioSink;
pub(crate) use pipeline::{MediaPipeline, PipelineEvent, PipelineExit, TrackCommand};
pub use quality::{QualityLevel, QualityMonitor};
pub use render::RenderTarget;
