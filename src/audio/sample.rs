use std::fmt::Debug;

use num_traits::{Bounded, FromPrimitive, Num, ToPrimitive};

use super::frame::SampleFormat;

/// A single-channel sample value as produced by a decoder.
///
/// The regulator stores everything as normalized f32 in `[-1.0, 1.0]`.
pub trait AudioSample:
    Num + Copy + Send + Sync + PartialOrd + ToPrimitive + FromPrimitive + Bounded + Debug + 'static
{
    /// Interleaved format of a stream made of this sample type.
    const FORMAT: SampleFormat;

    fn silence() -> Self;

    fn to_f32_normalized(self) -> f32;

    fn from_f32_normalized(value: f32) -> Self;

    /// Appends `samples` to `out`, normalized.
    fn extend_normalized(samples: &[Self], out: &mut Vec<f32>) {
        out.extend(samples.iter().map(|s| s.to_f32_normalized()));
    }
}

impl AudioSample for f32 {
    const FORMAT: SampleFormat = SampleFormat::F32;

    fn silence() -> Self {
        0.0
    }

    fn to_f32_normalized(self) -> f32 {
        self
    }

    fn from_f32_normalized(value: f32) -> Self {
        value.clamp(-1.0, 1.0)
    }

    fn extend_normalized(samples: &[Self], out: &mut Vec<f32>) {
        out.extend_from_slice(samples);
    }
}

impl AudioSample for i16 {
    const FORMAT: SampleFormat = SampleFormat::S16;

    fn silence() -> Self {
        0
    }

    fn to_f32_normalized(self) -> f32 {
        self as f32 / i16::MAX as f32
    }

    fn from_f32_normalized(value: f32) -> Self {
        (value.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_i16_normalization() {
        assert_eq!(i16::MAX.to_f32_normalized(), 1.0);
        assert_eq!(0i16.to_f32_normalized(), 0.0);
        assert!(i16::MIN.to_f32_normalized() < -1.0 + 1e-4);
        assert_eq!(i16::from_f32_normalized(2.0), i16::MAX);
        assert_eq!(i16::from_f32_normalized(0.5), i16::MAX / 2);
    }

    #[test]
    fn test_f32_passthrough() {
        let mut out = vec![9.0];
        f32::extend_normalized(&[0.25, -0.5], &mut out);
        assert_eq!(out, vec![9.0, 0.25, -0.5]);
        assert_eq!(f32::from_f32_normalized(-3.0), -1.0);
        assert_eq!(f32::silence(), 0.0);
        assert_eq!(<f32 as AudioSample>::FORMAT, SampleFormat::F32);
    }

    #[test]
    fn test_i16_extend() {
        let mut out = Vec::new();
        i16::extend_normalized(&[i16::MAX, i16::silence()], &mut out);
        assert_eq!(out, vec![1.0, 0.0]);
    }
}
