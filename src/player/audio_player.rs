//! Plays a decoded audio stream on an output device.
//!
//! The decoder thread opens the player, pushes frames and closes it. The
//! device pulls from the regulator on its own thread, through the callback
//! installed when the stream is opened.

use std::sync::Arc;

use anyhow::anyhow;
use tracing::{debug, info, warn};

use super::config::PlayerConfig;
use crate::audio::{AudioFrame, AudioRegulator, CodecParams, SampleFormat, StreamResampler};
use crate::error::{AudioError, try_alloc_zeroed};
use crate::io::{AudioBackend, OutputSpec, OutputStream, PullCallback, StreamSubmit};
use crate::pipeline::FrameSink;
use crate::platform_support::{ThreadPriority, raise_current_thread_priority};

/// The scratch buffer is never smaller than this, in samples.
const MIN_SCRATCH_SAMPLES: usize = 1024;
/// Largest output buffer the device layer accepts, in samples.
const MAX_OUTPUT_BUFFER_SAMPLES: u64 = 0xFFFF;

/// Everything that only exists while the player is open.
///
/// Field order is drop order: the stream (and the callback it owns) goes
/// first, so nothing pulls from the regulator while it is torn down.
struct Playback {
    stream: Box<dyn OutputStream>,
    regulator: Arc<AudioRegulator>,
    resampler: Option<StreamResampler>,
    converted: Vec<f32>,
    codec: CodecParams,
    spec: OutputSpec,
}

impl Playback {
    fn push(&mut self, frame: &AudioFrame) -> bool {
        let Some(resampler) = &mut self.resampler else {
            return self.regulator.push(frame);
        };

        if let Err(e) = frame.samples_per_channel(&self.codec) {
            warn!("AudioPlayer: rejected frame: {e:#}");
            return false;
        }
        self.converted.clear();
        frame.write_interleaved(&mut self.converted);

        let resampled = match resampler.process(&self.converted) {
            Ok(samples) => samples,
            Err(e) => {
                warn!("AudioPlayer: resampling failed: {e:#}");
                return false;
            }
        };
        if resampled.is_empty() {
            return true;
        }
        self.regulator
            .push(&AudioFrame::from_f32(frame.pts, resampled.to_vec()))
    }
}

enum State {
    Created,
    Opened(Playback),
    Closed,
}

/// Serves `requested` samples to the device, in scratch-sized chunks.
fn serve_request(
    regulator: &AudioRegulator,
    scratch: &mut [f32],
    requested: usize,
    out: &mut dyn StreamSubmit,
) {
    let channels = regulator.channels();
    let chunk_samples = scratch.len() / channels;

    let mut remaining = requested;
    while remaining > 0 {
        let count = remaining.min(chunk_samples);
        let chunk = &mut scratch[..count * channels];
        regulator.pull(chunk);
        if let Err(e) = out.submit(chunk) {
            warn!("AudioPlayer: could not submit audio: {e:#}");
            return;
        }
        remaining -= count;
    }
}

pub struct AudioPlayer<B: AudioBackend> {
    backend: B,
    config: PlayerConfig,
    state: State,
}

impl<B: AudioBackend> AudioPlayer<B> {
    pub fn new(backend: B, config: PlayerConfig) -> Self {
        Self {
            backend,
            config,
            state: State::Created,
        }
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, State::Opened(_))
    }

    /// Format granted by the device, while open.
    pub fn output_spec(&self) -> Option<&OutputSpec> {
        match &self.state {
            State::Opened(playback) => Some(&playback.spec),
            _ => None,
        }
    }

    /// The regulator feeding the device, while open.
    pub fn regulator(&self) -> Option<&Arc<AudioRegulator>> {
        match &self.state {
            State::Opened(playback) => Some(&playback.regulator),
            _ => None,
        }
    }

    /// Brings up everything needed to play `params`. On failure, whatever
    /// was already created is dropped again, in reverse order.
    fn start(&self, params: &CodecParams) -> Result<Playback, AudioError> {
        params
            .validate()
            .map_err(|e| AudioError::InvalidFormat(format!("{e:#}")))?;
        let channels = params.channels as usize;

        let output_buffer = self.config.output_buffer_samples(params.sample_rate);
        if output_buffer > MAX_OUTPUT_BUFFER_SAMPLES {
            return Err(AudioError::init(
                "Audio output buffer too big",
                anyhow!(
                    "{} samples requested, at most {} supported",
                    output_buffer,
                    MAX_OUTPUT_BUFFER_SAMPLES
                ),
            ));
        }
        let output_buffer = output_buffer as usize;

        // The fragment size is a hint, the device has the last word
        let requested = OutputSpec {
            sample_rate: params.sample_rate,
            channels: params.channels,
            fragment_samples: output_buffer as u32,
        };
        let spec = self
            .backend
            .configure(&requested)
            .map_err(|e| AudioError::init("Could not configure audio output", e))?;
        if spec.channels != params.channels {
            return Err(AudioError::init(
                "Could not configure audio output",
                anyhow!("device granted {} channels instead of {}", spec.channels, params.channels),
            ));
        }
        debug!("AudioPlayer: requested {:?}, got {:?}", requested, spec);

        let target = self.config.target_buffering_samples(spec.sample_rate);
        let target = u32::try_from(target).map_err(|_| {
            AudioError::InvalidFormat(format!("target buffering of {target} samples"))
        })?;

        let (regulator_params, resampler) = if spec.sample_rate == params.sample_rate {
            (*params, None)
        } else {
            info!(
                "AudioPlayer: resampling from {} Hz to {} Hz",
                params.sample_rate, spec.sample_rate
            );
            let resampler = StreamResampler::new(params.sample_rate, spec.sample_rate, channels)
                .map_err(|e| AudioError::init("Could not create resampler", e))?;
            let params = CodecParams::new(spec.sample_rate, params.channels, SampleFormat::F32);
            (params, Some(resampler))
        };
        let regulator = Arc::new(AudioRegulator::new(&regulator_params, target)?);

        let scratch_samples = output_buffer.max(MIN_SCRATCH_SAMPLES);
        let mut scratch = try_alloc_zeroed::<f32>(scratch_samples * channels, "audio output buffer")?;

        let callback_regulator = Arc::clone(&regulator);
        let callback: PullCallback = Box::new(move |requested, out| {
            serve_request(&callback_regulator, &mut scratch, requested, out);
        });
        let mut stream = self
            .backend
            .open_stream(&spec, callback)
            .map_err(|e| AudioError::init("Could not open audio device", e))?;

        if raise_current_thread_priority(&[ThreadPriority::TimeCritical, ThreadPriority::High])
            .is_none()
        {
            debug!("AudioPlayer: keeping default thread priority");
        }

        stream
            .resume()
            .map_err(|e| AudioError::init("Could not start audio playback", e))?;

        Ok(Playback {
            stream,
            regulator,
            resampler,
            converted: Vec::new(),
            codec: *params,
            spec,
        })
    }
}

impl<B: AudioBackend> FrameSink for AudioPlayer<B> {
    /// # Panics
    ///
    /// If the player has already been opened.
    fn open(&mut self, params: &CodecParams) -> Result<(), AudioError> {
        assert!(
            matches!(self.state, State::Created),
            "audio player can only be opened once"
        );

        let playback = self.start(params)?;
        info!(
            "Audio player opened: {} Hz, {} channels, target buffering {} samples",
            playback.spec.sample_rate,
            playback.spec.channels,
            playback.regulator.target_buffering()
        );
        self.state = State::Opened(playback);
        Ok(())
    }

    /// # Panics
    ///
    /// If the player is not open.
    fn close(&mut self) {
        assert!(self.is_open(), "audio player is not open");
        let State::Opened(mut playback) = std::mem::replace(&mut self.state, State::Closed) else {
            unreachable!();
        };

        if let Err(e) = playback.stream.pause() {
            warn!("AudioPlayer: {e:#}");
        }
        let stats = playback.regulator.stats();
        info!(
            "Audio player closed: underruns={} overflows={} dropped={}",
            stats.underruns(),
            stats.overflows(),
            stats.dropped_samples()
        );
    }

    /// # Panics
    ///
    /// If the player is not open.
    fn push(&mut self, frame: &AudioFrame) -> bool {
        match &mut self.state {
            State::Opened(playback) => playback.push(frame),
            _ => panic!("audio player is not open"),
        }
    }
}

impl<B: AudioBackend> Drop for AudioPlayer<B> {
    fn drop(&mut self) {
        if self.is_open() {
            self.close();
        }
    }
}
