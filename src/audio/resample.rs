//! Streaming sample-rate conversion with rubato.
//!
//! Used when the output device cannot run at the codec's sample rate. Input
//! arrives in frames of arbitrary size; rubato wants fixed-size chunks, so
//! samples are staged per channel until a full chunk is available.

use anyhow::Result;
use rubato::{FftFixedIn, Resampler};

const CHUNK_FRAMES: usize = 256;

pub struct StreamResampler {
    inner: FftFixedIn<f32>,
    channels: usize,
    from_rate: u32,
    to_rate: u32,
    staging: Vec<Vec<f32>>,
    output: Vec<f32>,
}

impl std::fmt::Debug for StreamResampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResampler")
            .field("channels", &self.channels)
            .field("from_rate", &self.from_rate)
            .field("to_rate", &self.to_rate)
            .field("staged", &self.staging.first().map_or(0, Vec::len))
            .finish()
    }
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32, channels: usize) -> Result<Self> {
        let inner = FftFixedIn::<f32>::new(
            from_rate as usize,
            to_rate as usize,
            CHUNK_FRAMES,
            2,
            channels,
        )?;

        Ok(Self {
            inner,
            channels,
            from_rate,
            to_rate,
            staging: vec![Vec::with_capacity(CHUNK_FRAMES * 2); channels],
            output: Vec::new(),
        })
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    /// Feeds interleaved samples and returns the interleaved samples that
    /// could be produced so far. The returned slice may be empty.
    pub fn process(&mut self, interleaved: &[f32]) -> Result<&[f32]> {
        for frame in interleaved.chunks_exact(self.channels) {
            for (channel, sample) in self.staging.iter_mut().zip(frame) {
                channel.push(*sample);
            }
        }

        self.output.clear();
        loop {
            let needed = self.inner.input_frames_next();
            if self.staging[0].len() < needed {
                break;
            }

            let chunk: Vec<&[f32]> = self.staging.iter().map(|c| &c[..needed]).collect();
            let resampled = self.inner.process(&chunk, None)?;

            let out_frames = resampled[0].len();
            self.output.reserve(out_frames * self.channels);
            for frame_idx in 0..out_frames {
                for channel in &resampled {
                    self.output.push(channel[frame_idx]);
                }
            }

            for channel in &mut self.staging {
                channel.drain(..needed);
            }
        }

        Ok(&self.output)
    }
}
