//! Configuration for the audio player.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Audio kept buffered between the decoder and the device.
    pub target_buffering_ms: u32,
    /// Device buffer duration. Small values mean low latency but more
    /// frequent callbacks.
    pub output_buffer_ms: u32,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            target_buffering_ms: 50,
            output_buffer_ms: 5,
        }
    }
}

impl PlayerConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("Invalid config in {}", path.display()))
    }

    pub(crate) fn target_buffering_samples(&self, sample_rate: u32) -> u64 {
        sample_rate as u64 * self.target_buffering_ms as u64 / 1000
    }

    pub(crate) fn output_buffer_samples(&self, sample_rate: u32) -> u64 {
        sample_rate as u64 * self.output_buffer_ms as u64 / 1000
    }
}
