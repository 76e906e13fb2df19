//! Audio presentation for a device-mirroring client.
//!
//! Decoded frames arrive from a remote device with network jitter and a clock
//! of their own. [`player::AudioPlayer`] plays them on a local output device,
//! keeping latency bounded and filling gaps with silence.

pub mod audio;
pub mod error;
pub mod io;
pub mod pipeline;
pub mod platform_support;
pub mod player;

pub use error::AudioError;
