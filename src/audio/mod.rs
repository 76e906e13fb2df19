//! Audio data types and the buffering core.
//!
//! # Data Types
//! - [`AudioSample`] - Trait for audio sample types (i16, f32)
//! - [`frame::AudioFrame`] - A decoded frame with an optional presentation timestamp
//! - [`frame::CodecParams`] - Stream format negotiated when the decoder opens its sinks
//!
//! # Buffering
//! - [`ring::SampleRing`] - Fixed-capacity ring of interleaved samples
//! - [`regulator::AudioRegulator`] - Bounded buffer between the decoder and the device callback
//! - [`compensation`] - Keeps the average buffering close to its target
//!
//! # Conversion
//! - [`resample::StreamResampler`] - Rate conversion when the device cannot match the stream

pub mod compensation;
pub mod frame;
pub mod regulator;
pub mod resample;
pub mod ring;
pub mod sample;

pub use frame::{AudioFrame, CodecParams, FrameData, SampleFormat};
pub use regulator::{AudioRegulator, RegulatorStats};
pub use resample::StreamResampler;
pub use sample::AudioSample;
