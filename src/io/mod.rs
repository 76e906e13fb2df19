//! Hardware I/O.
//!
//! - [`AudioBackend`] / [`OutputStream`] / [`StreamSubmit`] - What the player needs from an output device
//! - [`CpalBackend`] - Speaker playback via cpal

pub mod audio;

pub use audio::{AudioBackend, CpalBackend, OutputSpec, OutputStream, PullCallback, StreamSubmit};
