//! Audio playback of a decoded stream.
//!
//! - [`AudioPlayer`] - Opens the output device and feeds it from an [`AudioRegulator`](crate::audio::AudioRegulator)
//! - [`PlayerConfig`] - Buffering durations

pub mod audio_player;
pub mod config;

pub use audio_player::AudioPlayer;
pub use config::PlayerConfig;
