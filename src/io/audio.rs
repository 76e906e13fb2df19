//! Audio output device boundary.
//!
//! The player only talks to the traits defined here:
//! - [`AudioBackend`] negotiates the output format and opens streams
//! - [`OutputStream`] is a live stream; dropping it closes the device
//! - [`StreamSubmit`] receives the samples produced by the pull callback
//!
//! [`CpalBackend`] implements them on top of cpal.

use anyhow::{Context, Result, bail};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, DeviceId, SampleFormat, StreamConfig};
use dasp_sample::{FromSample, Sample as DaspSample};
use tracing::{debug, error, info, warn};

/// Output format requested from, or granted by, the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSpec {
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples the device consumes per callback.
    pub fragment_samples: u32,
}

/// Destination of the samples produced during one device callback.
pub trait StreamSubmit {
    /// Appends interleaved f32 samples to the device buffer.
    fn submit(&mut self, samples: &[f32]) -> Result<()>;
}

/// Invoked on the device thread with the number of samples the device wants.
/// The callee must submit exactly that many samples, in one or more chunks.
pub type PullCallback = Box<dyn FnMut(usize, &mut dyn StreamSubmit) + Send + 'static>;

/// A live output stream. Dropping it closes the device.
pub trait OutputStream {
    fn resume(&mut self) -> Result<()>;

    fn pause(&mut self) -> Result<()>;
}

pub trait AudioBackend {
    /// Negotiates the format for a stream. The returned spec may differ from
    /// the requested one (sample rate, fragment size).
    fn configure(&self, requested: &OutputSpec) -> Result<OutputSpec>;

    /// Opens a paused stream with a spec previously returned by
    /// [`Self::configure`].
    fn open_stream(&self, spec: &OutputSpec, callback: PullCallback)
    -> Result<Box<dyn OutputStream>>;
}

fn find_device_by_id<I: Iterator<Item = Device>>(
    devices: I,
    device_id: &DeviceId,
) -> Option<Device> {
    devices
        .filter_map(|d| d.id().ok().map(|id| (d, id)))
        .find(|(_, id)| id == device_id)
        .map(|(d, _)| d)
}

fn get_output_device(device_id: Option<&DeviceId>) -> Result<Device> {
    let host = cpal::default_host();
    match device_id {
        Some(id) => {
            let devices = host
                .output_devices()
                .context("Failed to enumerate output devices")?;
            find_device_by_id(devices, id).context("Output device not found")
        }
        None => host
            .default_output_device()
            .context("No default output device available"),
    }
}

/// Device configuration resolved for a requested spec.
struct Resolved {
    config: StreamConfig,
    sample_format: SampleFormat,
    fragment_samples: u32,
}

fn resolve(device: &Device, requested: &OutputSpec) -> Result<Resolved> {
    let default = device
        .default_output_config()
        .context("Failed to get default output config")?;
    debug!("Default output config: {default:?}");

    let ranges: Vec<_> = device
        .supported_output_configs()
        .context("Failed to query supported output configs")?
        .filter(|range| range.channels() == requested.channels)
        .collect();
    if ranges.is_empty() {
        bail!(
            "Output device does not support {} channels",
            requested.channels
        );
    }

    let supports = |range: &&cpal::SupportedStreamConfigRange, rate: u32| {
        range.min_sample_rate() <= rate && rate <= range.max_sample_rate()
    };

    // Prefer the stream rate, then the device rate, and the device's own
    // sample format when possible.
    let (range, sample_rate) = [requested.sample_rate, default.sample_rate()]
        .into_iter()
        .find_map(|rate| {
            ranges
                .iter()
                .filter(|range| supports(range, rate))
                .max_by_key(|range| range.sample_format() == default.sample_format())
                .map(|range| (range, rate))
        })
        .context("No usable output sample rate")?;

    let (buffer_size, fragment_samples) = match range.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            let size = requested.fragment_samples.clamp(*min, *max);
            debug!(
                "Using output buffer size: {} (min={}, max={})",
                size, min, max
            );
            (BufferSize::Fixed(size), size)
        }
        cpal::SupportedBufferSize::Unknown => {
            warn!("Supported buffer size range unknown, using default");
            (BufferSize::Default, requested.fragment_samples)
        }
    };

    Ok(Resolved {
        config: StreamConfig {
            channels: requested.channels,
            sample_rate,
            buffer_size,
        },
        sample_format: range.sample_format(),
        fragment_samples,
    })
}

/// Writes submitted samples into the buffer cpal handed to the callback,
/// converting them to the device sample type.
struct DeviceBuffer<'a, T> {
    data: &'a mut [T],
    written: usize,
}

impl<T> StreamSubmit for DeviceBuffer<'_, T>
where
    T: DaspSample + FromSample<f32>,
{
    fn submit(&mut self, samples: &[f32]) -> Result<()> {
        let end = self.written + samples.len();
        let Some(dst) = self.data.get_mut(self.written..end) else {
            bail!(
                "Submitted {} values, only {} left in the device buffer",
                samples.len(),
                self.data.len() - self.written
            );
        };
        for (d, s) in dst.iter_mut().zip(samples) {
            *d = T::from_sample(*s);
        }
        self.written = end;
        Ok(())
    }
}

struct CpalStream {
    stream: cpal::Stream,
}

impl OutputStream for CpalStream {
    fn resume(&mut self) -> Result<()> {
        self.stream.play().context("Failed to start output stream")
    }

    fn pause(&mut self) -> Result<()> {
        self.stream.pause().context("Failed to pause output stream")
    }
}

/// Plays to the default output device, or to a specific one.
#[derive(Debug, Clone, Default)]
pub struct CpalBackend {
    device_id: Option<DeviceId>,
}

impl CpalBackend {
    pub fn new(device_id: Option<DeviceId>) -> Self {
        Self { device_id }
    }

    fn build_stream<T>(
        device: &Device,
        config: &StreamConfig,
        mut callback: PullCallback,
    ) -> Result<cpal::Stream>
    where
        T: cpal::SizedSample + FromSample<f32>,
    {
        let channels = config.channels as usize;
        let stream = device.build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let requested = data.len() / channels;
                let mut buffer = DeviceBuffer { data, written: 0 };
                callback(requested, &mut buffer);
                // Whatever the callback did not provide stays silent
                let written = buffer.written;
                buffer.data[written..].fill(T::EQUILIBRIUM);
            },
            |err| error!("An error occurred on the output audio stream: {}", err),
            None,
        )?;
        Ok(stream)
    }
}

impl AudioBackend for CpalBackend {
    fn configure(&self, requested: &OutputSpec) -> Result<OutputSpec> {
        let device = get_output_device(self.device_id.as_ref())?;
        let resolved = resolve(&device, requested)?;

        Ok(OutputSpec {
            sample_rate: resolved.config.sample_rate,
            channels: resolved.config.channels,
            fragment_samples: resolved.fragment_samples,
        })
    }

    fn open_stream(
        &self,
        spec: &OutputSpec,
        callback: PullCallback,
    ) -> Result<Box<dyn OutputStream>> {
        let device = get_output_device(self.device_id.as_ref())?;
        let resolved = resolve(&device, spec)?;
        if resolved.config.sample_rate != spec.sample_rate {
            bail!(
                "Output device no longer supports {} Hz",
                spec.sample_rate
            );
        }

        info!(
            "Opening output stream: {:?} {:?}",
            resolved.config, resolved.sample_format
        );
        let stream = match resolved.sample_format {
            SampleFormat::I16 => Self::build_stream::<i16>(&device, &resolved.config, callback)?,
            SampleFormat::U16 => Self::build_stream::<u16>(&device, &resolved.config, callback)?,
            SampleFormat::F32 => Self::build_stream::<f32>(&device, &resolved.config, callback)?,
            format => bail!("Unsupported sample format: {:?}", format),
        };

        Ok(Box::new(CpalStream { stream }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_buffer_converts_samples() {
        let mut data = [0i16; 4];
        let mut buffer = DeviceBuffer {
            data: &mut data,
            written: 0,
        };
        buffer.submit(&[1.0, -1.0]).unwrap();
        buffer.submit(&[0.0]).unwrap();
        assert_eq!(buffer.written, 3);
        assert_eq!(data[0], i16::MAX);
        assert_eq!(data[1], i16::MIN);
        assert_eq!(data[2], 0);
    }

    #[test]
    fn test_device_buffer_rejects_overflow() {
        let mut data = [0.0f32; 2];
        let mut buffer = DeviceBuffer {
            data: &mut data,
            written: 0,
        };
        assert!(buffer.submit(&[0.5; 3]).is_err());
        assert_eq!(buffer.written, 0);
        buffer.submit(&[0.5; 2]).unwrap();
        assert!(buffer.submit(&[0.5]).is_err());
    }

    #[test]
    fn test_device_buffer_u16_equilibrium() {
        let mut data = [0u16; 1];
        let mut buffer = DeviceBuffer {
            data: &mut data,
            written: 0,
        };
        buffer.submit(&[0.0]).unwrap();
        assert_eq!(data[0], u16::EQUILIBRIUM);
    }
}
