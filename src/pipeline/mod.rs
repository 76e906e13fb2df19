//! Plumbing between the decoder and whatever consumes its output.
//!
//! - [`FrameSink`] - Trait implemented by frame consumers such as the audio player
//! - [`SinkTee`] - Fan-out of a single decoded stream to several sinks

pub mod sink;

pub use sink::{FrameSink, SinkTee};
