use anyhow::{Result, bail};

use super::AudioSample;

/// Sample layout produced by the upstream decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// Interleaved signed 16-bit samples.
    S16,
    /// Interleaved 32-bit float samples.
    F32,
    /// One plane of 32-bit float samples per channel.
    F32Planar,
}

/// Stream-level parameters negotiated once, when the decoder opens its sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecParams {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
}

impl CodecParams {
    pub fn new(sample_rate: u32, channels: u16, sample_format: SampleFormat) -> Self {
        Self {
            sample_rate,
            channels,
            sample_format,
        }
    }

    /// Checks the invariants the audio core relies on.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            bail!("sample rate must be positive");
        }
        if self.channels == 0 || self.channels > 255 {
            bail!("unsupported channel count {}", self.channels);
        }
        Ok(())
    }

    /// Size in bytes of one output sample (all channels, interleaved f32).
    pub fn output_sample_size(&self) -> usize {
        self.channels as usize * std::mem::size_of::<f32>()
    }
}

/// Decoded sample storage for one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameData {
    S16(Vec<i16>),
    F32(Vec<f32>),
    F32Planar(Vec<Vec<f32>>),
}

impl FrameData {
    pub fn format(&self) -> SampleFormat {
        match self {
            FrameData::S16(_) => SampleFormat::S16,
            FrameData::F32(_) => SampleFormat::F32,
            FrameData::F32Planar(_) => SampleFormat::F32Planar,
        }
    }
}

/// A decoded audio frame, as pushed by the decode pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Presentation timestamp in microseconds, if the stream carries one.
    pub pts: Option<i64>,
    pub data: FrameData,
}

impl AudioFrame {
    pub fn new(pts: Option<i64>, data: FrameData) -> Self {
        Self { pts, data }
    }

    pub fn from_f32(pts: Option<i64>, samples: Vec<f32>) -> Self {
        Self::new(pts, FrameData::F32(samples))
    }

    pub fn from_i16(pts: Option<i64>, samples: Vec<i16>) -> Self {
        Self::new(pts, FrameData::S16(samples))
    }

    /// Returns the number of samples per channel, or an error if the frame
    /// layout does not match `params`.
    pub fn samples_per_channel(&self, params: &CodecParams) -> Result<usize> {
        let channels = params.channels as usize;
        if self.data.format() != params.sample_format {
            bail!(
                "frame format {:?} does not match stream format {:?}",
                self.data.format(),
                params.sample_format
            );
        }
        match &self.data {
            FrameData::S16(data) => interleaved_len(data.len(), channels),
            FrameData::F32(data) => interleaved_len(data.len(), channels),
            FrameData::F32Planar(planes) => {
                if planes.len() != channels {
                    bail!("expected {} planes, got {}", channels, planes.len());
                }
                let len = planes.first().map_or(0, Vec::len);
                if planes.iter().any(|p| p.len() != len) {
                    bail!("planes have different lengths");
                }
                Ok(len)
            }
        }
    }

    /// Appends the frame to `out` as interleaved normalized f32.
    ///
    /// The frame must already have been checked with [`Self::samples_per_channel`].
    pub fn write_interleaved(&self, out: &mut Vec<f32>) {
        match &self.data {
            FrameData::S16(data) => i16::extend_normalized(data, out),
            FrameData::F32(data) => f32::extend_normalized(data, out),
            FrameData::F32Planar(planes) => {
                let len = planes.first().map_or(0, Vec::len);
                out.reserve(len * planes.len());
                for i in 0..len {
                    out.extend(planes.iter().map(|plane| plane[i]));
                }
            }
        }
    }
}

fn interleaved_len(len: usize, channels: usize) -> Result<usize> {
    if len % channels != 0 {
        bail!("Data length {} must be a multiple of channels {}", len, channels);
    }
    Ok(len / channels)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo(format: SampleFormat) -> CodecParams {
        CodecParams::new(48000, 2, format)
    }

    #[test]
    fn test_interleaved_frame_length() {
        let frame = AudioFrame::from_f32(None, vec![0.0; 1920]);
        assert_eq!(frame.samples_per_channel(&stereo(SampleFormat::F32)).unwrap(), 960);

        let odd = AudioFrame::from_f32(None, vec![0.0; 961]);
        assert!(odd.samples_per_channel(&stereo(SampleFormat::F32)).is_err());
    }

    #[test]
    fn test_format_mismatch_is_rejected() {
        let frame = AudioFrame::from_i16(None, vec![0; 4]);
        assert!(frame.samples_per_channel(&stereo(SampleFormat::F32)).is_err());
    }

    #[test]
    fn test_planar_frame_is_interleaved() {
        let frame = AudioFrame::new(
            Some(0),
            FrameData::F32Planar(vec![vec![1.0, 2.0, 3.0], vec![10.0, 20.0, 30.0]]),
        );
        let params = stereo(SampleFormat::F32Planar);
        assert_eq!(frame.samples_per_channel(&params).unwrap(), 3);

        let mut out = Vec::new();
        frame.write_interleaved(&mut out);
        assert_eq!(out, vec![1.0, 10.0, 2.0, 20.0, 3.0, 30.0]);
    }

    #[test]
    fn test_ragged_planes_are_rejected() {
        let frame = AudioFrame::new(None, FrameData::F32Planar(vec![vec![1.0, 2.0], vec![1.0]]));
        assert!(frame.samples_per_channel(&stereo(SampleFormat::F32Planar)).is_err());
    }

    #[test]
    fn test_s16_is_normalized() {
        let frame = AudioFrame::from_i16(None, vec![i16::MAX, 0]);
        let mut out = Vec::new();
        frame.write_interleaved(&mut out);
        assert_eq!(out, vec![1.0, 0.0]);
    }

    #[test]
    fn test_codec_params_validation() {
        assert!(stereo(SampleFormat::F32).validate().is_ok());
        assert!(CodecParams::new(0, 2, SampleFormat::F32).validate().is_err());
        assert!(CodecParams::new(48000, 0, SampleFormat::F32).validate().is_err());
        assert_eq!(stereo(SampleFormat::F32).output_sample_size(), 8);
    }
}
