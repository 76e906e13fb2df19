//! Audio regulator: decouples an irregular producer from a hardware-paced
//! consumer while keeping the buffered latency close to a target.
//!
//! The decode thread calls [`AudioRegulator::push`] with frames of arbitrary
//! size at irregular intervals. The audio callback thread calls
//! [`AudioRegulator::pull`] for fixed-size chunks at its own cadence.
//!
//! Key design principle: neither side ever waits for the other.
//! - On push: drop the oldest buffered audio when there is no room
//! - On pull: fill the shortfall with silence
//! - Between the two: compensation slowly adds or removes samples to bring
//!   the average buffering back to the target

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crossbeam::atomic::AtomicCell;
use tracing::{debug, trace, warn};

use super::compensation::{Compensation, CompensationController, CompensationUpdate, Compensator};
use super::frame::{AudioFrame, CodecParams};
use super::ring::SampleRing;
use crate::error::AudioError;

/// Upper bound of the output device buffer, used to size the ring slack.
const MAX_OUTPUT_BUFFER_MS: u32 = 30;
/// A timestamp gap larger than this is treated as a discontinuity.
const DISCONTINUITY_THRESHOLD_US: i64 = 100_000;
/// Extra buffering tolerated above the target before playback starts.
const INITIAL_MARGIN_MS: u32 = 10;
/// Extra buffering tolerated above 110% of the target once playing.
const PLAYING_MARGIN_MS: u32 = 60;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // The protected state stays consistent even if a holder panicked, and the
    // audio callback must keep running.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn ms_to_samples(ms: u32, sample_rate: u32) -> usize {
    (sample_rate as u64 * ms as u64 / 1000) as usize
}

/// Lock-free counters describing the regulator's behavior.
#[derive(Debug, Default)]
pub struct RegulatorStats {
    underruns: AtomicU64,
    silence_samples: AtomicU64,
    overflows: AtomicU64,
    dropped_samples: AtomicU64,
    buffered: AtomicUsize,
    average_buffering: AtomicCell<f32>,
    compensation: AtomicCell<i32>,
}

impl RegulatorStats {
    /// Number of pulls that had to emit silence (including the initial
    /// buffering phase).
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    /// Total silence samples emitted.
    pub fn silence_samples(&self) -> u64 {
        self.silence_samples.load(Ordering::Relaxed)
    }

    /// Number of pushes that overflowed the ring capacity.
    pub fn overflows(&self) -> u64 {
        self.overflows.load(Ordering::Relaxed)
    }

    /// Samples discarded for any reason (overflow, buffering ceiling,
    /// discontinuity).
    pub fn dropped_samples(&self) -> u64 {
        self.dropped_samples.load(Ordering::Relaxed)
    }

    /// Buffered samples after the last push or pull.
    pub fn buffered(&self) -> usize {
        self.buffered.load(Ordering::Relaxed)
    }

    /// Smoothed buffering level, in samples.
    pub fn average_buffering(&self) -> f32 {
        self.average_buffering.load()
    }

    /// Current compensation, in samples to add (negative: remove) over the
    /// compensation distance.
    pub fn compensation(&self) -> i32 {
        self.compensation.load()
    }

    fn record_underrun(&self, silence: usize) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
        self.silence_samples
            .fetch_add(silence as u64, Ordering::Relaxed);
    }

    fn record_dropped(&self, dropped: usize) {
        self.dropped_samples
            .fetch_add(dropped as u64, Ordering::Relaxed);
    }
}

/// State shared between producer and consumer, guarded by one mutex.
struct Shared {
    ring: SampleRing,
    controller: CompensationController,
    /// Real samples have been handed to the output at least once.
    played: bool,
    /// At least one frame has been pushed.
    received: bool,
    /// Compensation decided by the consumer, not yet picked up by the producer.
    pending: Option<Compensation>,
}

/// Producer-side scratch state. Only the push thread touches it.
struct Producer {
    compensator: Compensator,
    converted: Vec<f32>,
    compensated: Vec<f32>,
    next_expected_pts: Option<i64>,
}

struct PushOutcome {
    overflowed: usize,
    over_ceiling: usize,
    discontinuity: usize,
    played: bool,
}

enum PullOutcome {
    Priming { level: usize },
    Played {
        silence: usize,
        update: Option<CompensationUpdate>,
    },
}

pub struct AudioRegulator {
    params: CodecParams,
    target: u32,
    capacity: usize,
    shared: Mutex<Shared>,
    producer: Mutex<Producer>,
    stats: RegulatorStats,
}

impl std::fmt::Debug for AudioRegulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioRegulator")
            .field("params", &self.params)
            .field("target", &self.target)
            .field("capacity", &self.capacity)
            .field("stats", &self.stats)
            .finish()
    }
}

impl AudioRegulator {
    /// Creates a regulator for frames described by `params`, aiming at
    /// `target_buffering` samples of buffered audio.
    pub fn new(params: &CodecParams, target_buffering: u32) -> Result<Self, AudioError> {
        let capacity = target_buffering as usize
            + 12 * ms_to_samples(MAX_OUTPUT_BUFFER_MS, params.sample_rate)
            + target_buffering as usize / 10;
        Self::with_capacity(params, target_buffering, capacity)
    }

    /// Same as [`Self::new`] with an explicit ring capacity, in samples.
    pub fn with_capacity(
        params: &CodecParams,
        target_buffering: u32,
        capacity: usize,
    ) -> Result<Self, AudioError> {
        params
            .validate()
            .map_err(|e| AudioError::InvalidFormat(format!("{e:#}")))?;
        if capacity == 0 || capacity < target_buffering as usize {
            return Err(AudioError::InvalidFormat(format!(
                "ring capacity {capacity} cannot hold target buffering {target_buffering}"
            )));
        }

        let channels = params.channels as usize;
        let ring = SampleRing::new(capacity, channels)?;

        debug!(
            "AudioRegulator: sample_rate={} channels={} target={} capacity={}",
            params.sample_rate, channels, target_buffering, capacity
        );

        Ok(Self {
            params: *params,
            target: target_buffering,
            capacity,
            shared: Mutex::new(Shared {
                ring,
                controller: CompensationController::new(params.sample_rate, target_buffering),
                played: false,
                received: false,
                pending: None,
            }),
            producer: Mutex::new(Producer {
                compensator: Compensator::new(channels),
                converted: Vec::new(),
                compensated: Vec::new(),
                next_expected_pts: None,
            }),
            stats: RegulatorStats::default(),
        })
    }

    pub fn params(&self) -> &CodecParams {
        &self.params
    }

    pub fn channels(&self) -> usize {
        self.params.channels as usize
    }

    pub fn sample_rate(&self) -> u32 {
        self.params.sample_rate
    }

    /// Size in bytes of one sample of the output (interleaved f32).
    pub fn sample_size(&self) -> usize {
        self.params.output_sample_size()
    }

    pub fn target_buffering(&self) -> u32 {
        self.target
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples currently buffered.
    pub fn buffered(&self) -> usize {
        lock(&self.shared).ring.len()
    }

    /// Whether real samples have been handed to the output yet.
    pub fn is_playing(&self) -> bool {
        lock(&self.shared).played
    }

    pub fn stats(&self) -> &RegulatorStats {
        &self.stats
    }

    fn max_buffered(&self, played: bool) -> usize {
        let rate = self.params.sample_rate;
        if played {
            self.target as usize * 11 / 10 + ms_to_samples(PLAYING_MARGIN_MS, rate)
        } else {
            // Accumulating more before the start would only add delay.
            self.target as usize + ms_to_samples(INITIAL_MARGIN_MS, rate)
        }
    }

    /// Accepts one decoded frame. Never blocks waiting for the consumer.
    ///
    /// Returns `false` only if the frame does not match the stream format.
    /// Overflow is not an error: the oldest buffered samples are dropped.
    pub fn push(&self, frame: &AudioFrame) -> bool {
        let input_samples = match frame.samples_per_channel(&self.params) {
            Ok(n) => n,
            Err(e) => {
                warn!("AudioRegulator: rejected frame: {e:#}");
                return false;
            }
        };
        let channels = self.channels();

        let mut producer = lock(&self.producer);
        let producer = &mut *producer;

        producer.converted.clear();
        frame.write_interleaved(&mut producer.converted);

        let mut discontinuity = false;
        if let Some(pts) = frame.pts {
            if let Some(expected) = producer.next_expected_pts {
                let gap = pts - expected;
                if gap > DISCONTINUITY_THRESHOLD_US {
                    // Typically silence the device did not capture
                    trace!("AudioRegulator: discontinuity detected: {}us", gap);
                    discontinuity = true;
                }
            }
            let duration = input_samples as i64 * 1_000_000 / self.params.sample_rate as i64;
            producer.next_expected_pts = Some(pts + duration);
        }

        let pending = lock(&self.shared).pending.take();
        if let Some(compensation) = pending {
            producer.compensator.set(compensation);
        }

        producer.compensated.clear();
        let compensated = producer
            .compensator
            .process(&producer.converted, &mut producer.compensated);
        let samples = &producer.compensated;
        let written = samples.len() / channels;

        let outcome = {
            let mut shared = lock(&self.shared);
            let shared = &mut *shared;

            let mut dropped_discontinuity = 0;
            if discontinuity {
                let can_read = shared.ring.len();
                if written + can_read > self.target as usize {
                    let skip = (written + can_read - self.target as usize).min(can_read);
                    dropped_discontinuity = shared.ring.skip(skip);
                }
            }

            let overflowed = shared.ring.write(samples);

            let max_buffered = self.max_buffered(shared.played);
            let over_ceiling = shared
                .ring
                .skip(shared.ring.len().saturating_sub(max_buffered));

            shared.received = true;

            let dropped = overflowed + over_ceiling + dropped_discontinuity;
            if shared.played {
                // Instant changes of the level must not be smoothed
                shared.controller.adjust(compensated - dropped as i64);
            }

            if overflowed > 0 {
                self.stats.overflows.fetch_add(1, Ordering::Relaxed);
            }
            self.stats.record_dropped(dropped);
            self.stats.buffered.store(shared.ring.len(), Ordering::Relaxed);

            PushOutcome {
                overflowed,
                over_ceiling,
                discontinuity: dropped_discontinuity,
                played: shared.played,
            }
        };

        if outcome.overflowed > 0 {
            debug!(
                "AudioRegulator: buffer full, dropped {} samples",
                outcome.overflowed
            );
        }
        if outcome.over_ceiling > 0 {
            if outcome.played {
                debug!(
                    "AudioRegulator: buffering threshold exceeded, skipped {} samples",
                    outcome.over_ceiling
                );
            } else {
                trace!(
                    "AudioRegulator: playback not started, skipped {} samples",
                    outcome.over_ceiling
                );
            }
        }
        if outcome.discontinuity > 0 {
            debug!(
                "AudioRegulator: dropped {} samples after discontinuity",
                outcome.discontinuity
            );
        }

        true
    }

    /// Fills `out` with exactly `out.len() / channels` samples. Never blocks
    /// waiting for the producer: missing samples are replaced by silence.
    ///
    /// # Panics
    ///
    /// If `out.len()` is not a multiple of the channel count.
    pub fn pull(&self, out: &mut [f32]) {
        let channels = self.channels();
        assert!(
            out.len() % channels == 0,
            "output length {} is not a multiple of {} channels",
            out.len(),
            channels
        );
        let requested = out.len() / channels;
        let target = self.target as usize;

        let outcome = {
            let mut shared = lock(&self.shared);
            let shared = &mut *shared;
            let level = shared.ring.len();

            if !shared.played && level < target {
                // Delay the start until the target buffering is reached
                out.fill(0.0);
                self.stats.record_underrun(requested);
                PullOutcome::Priming { level }
            } else {
                shared.controller.observe(level);

                let read = shared.ring.read(out);
                let silence = requested - read;
                if silence > 0 {
                    out[read * channels..].fill(0.0);
                    self.stats.record_underrun(silence);
                    if shared.received {
                        // Inserted silence instantly increases the buffering
                        shared.controller.adjust(silence as i64);
                    }
                }
                shared.played = true;

                let update = shared.controller.on_consumed(requested, level);
                if let Some(update) = update {
                    shared.pending = Some(update.compensation);
                    self.stats.compensation.store(update.compensation.delta);
                }

                self.stats
                    .average_buffering
                    .store(shared.controller.average());
                self.stats.buffered.store(shared.ring.len(), Ordering::Relaxed);

                PullOutcome::Played { silence, update }
            }
        };

        match outcome {
            PullOutcome::Priming { level } => {
                trace!(
                    "AudioRegulator: initial buffering {}/{}, inserting {} samples of silence",
                    level, target, requested
                );
            }
            PullOutcome::Played { silence, update } => {
                if silence > 0 {
                    trace!(
                        "AudioRegulator: buffer underflow, inserting {} samples of silence",
                        silence
                    );
                }
                if let Some(update) = update {
                    debug!(
                        "AudioRegulator: buffering target={} avg={:.1} cur={} compensation={}",
                        target, update.average, update.level, update.compensation.delta
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::frame::SampleFormat;

    const RATE: u32 = 48000;

    fn stereo() -> CodecParams {
        CodecParams::new(RATE, 2, SampleFormat::F32)
    }

    /// Stereo frame whose sample `i` holds the value `start + i` on both channels.
    fn ramp_frame(start: usize, count: usize) -> AudioFrame {
        let samples = (start..start + count)
            .flat_map(|i| [i as f32, i as f32])
            .collect();
        AudioFrame::from_f32(None, samples)
    }

    fn sample_values(out: &[f32]) -> Vec<f32> {
        out.chunks_exact(2).map(|s| s[0]).collect()
    }

    #[test]
    fn test_pull_returns_pushed_samples_in_order() {
        let regulator = AudioRegulator::new(&stereo(), 2400).unwrap();
        for i in 0..3 {
            assert!(regulator.push(&ramp_frame(1 + i * 960, 960)));
        }
        assert_eq!(regulator.buffered(), 2880);

        let mut out = vec![0.0; 2000 * 2];
        regulator.pull(&mut out);
        let values = sample_values(&out);
        let expected: Vec<f32> = (1..=2000).map(|i| i as f32).collect();
        assert_eq!(values, expected);

        // The remaining 880 samples come next, then silence
        regulator.pull(&mut out);
        let values = sample_values(&out);
        assert_eq!(values[0], 2001.0);
        assert_eq!(values[879], 2880.0);
        assert!(values[880..].iter().all(|&v| v == 0.0));
        assert_eq!(regulator.stats().underruns(), 1);
        assert_eq!(regulator.stats().silence_samples(), 1120);
    }

    #[test]
    fn test_overflow_keeps_most_recent_samples() {
        // Target such that the initial buffering ceiling equals the capacity
        let regulator = AudioRegulator::with_capacity(&stereo(), 4320, 4800).unwrap();
        assert!(regulator.push(&ramp_frame(0, 6000)));
        assert_eq!(regulator.buffered(), 4800);
        assert_eq!(regulator.stats().overflows(), 1);
        assert_eq!(regulator.stats().dropped_samples(), 1200);

        let mut out = vec![0.0; 4800 * 2];
        regulator.pull(&mut out);
        let values = sample_values(&out);
        let expected: Vec<f32> = (1200..6000).map(|i| i as f32).collect();
        assert_eq!(values, expected);
    }

    #[test]
    fn test_pull_without_push_is_silence() {
        let regulator = AudioRegulator::new(&stereo(), 2400).unwrap();
        let mut out = vec![1.0; 512 * 2];
        regulator.pull(&mut out);
        assert!(out.iter().all(|&v| v == 0.0));
        assert_eq!(regulator.stats().underruns(), 1);
        assert!(!regulator.is_playing());
    }

    #[test]
    fn test_initial_buffering_waits_for_target() {
        let regulator = AudioRegulator::new(&stereo(), 2400).unwrap();
        regulator.push(&ramp_frame(1, 960));
        regulator.push(&ramp_frame(961, 960));

        let mut out = vec![0.0; 480 * 2];
        regulator.pull(&mut out);
        assert!(out.iter().all(|&v| v == 0.0));
        assert_eq!(regulator.buffered(), 1920, "priming must not consume data");

        regulator.push(&ramp_frame(1921, 960));
        regulator.pull(&mut out);
        assert_eq!(sample_values(&out)[0], 1.0);
        assert!(regulator.is_playing());
    }

    #[test]
    fn test_buffering_ceiling_before_start() {
        let regulator = AudioRegulator::new(&stereo(), 2400).unwrap();
        for i in 0..4 {
            regulator.push(&ramp_frame(i * 960, 960));
        }
        // target + 10ms
        assert_eq!(regulator.buffered(), 2880);
        assert_eq!(regulator.stats().overflows(), 0);
        assert_eq!(regulator.stats().dropped_samples(), 960);

        let mut out = vec![0.0; 2 * 2];
        regulator.pull(&mut out);
        assert_eq!(sample_values(&out), vec![960.0, 961.0]);
    }

    #[test]
    fn test_buffered_never_exceeds_capacity() {
        let regulator = AudioRegulator::with_capacity(&stereo(), 1000, 1500).unwrap();
        for i in 0..50 {
            regulator.push(&ramp_frame(i * 700, 700));
            assert!(regulator.buffered() <= regulator.capacity());
        }
    }

    #[test]
    fn test_format_mismatch_is_rejected() {
        let regulator = AudioRegulator::new(&stereo(), 2400).unwrap();
        assert!(!regulator.push(&AudioFrame::from_i16(None, vec![0; 8])));
        assert!(!regulator.push(&AudioFrame::from_f32(None, vec![0.0; 3])));
        assert_eq!(regulator.buffered(), 0);
    }

    #[test]
    fn test_s16_source_is_converted() {
        let params = CodecParams::new(RATE, 1, SampleFormat::S16);
        let regulator = AudioRegulator::new(&params, 0).unwrap();
        regulator.push(&AudioFrame::from_i16(None, vec![i16::MAX, 0, i16::MAX / 2]));

        let mut out = vec![0.0; 3];
        regulator.pull(&mut out);
        assert_eq!(out[0], 1.0);
        assert_eq!(out[1], 0.0);
        assert!((out[2] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_discontinuity_drops_old_samples() {
        let regulator = AudioRegulator::new(&stereo(), 2400).unwrap();
        for i in 0..3 {
            let mut frame = ramp_frame(i * 960, 960);
            frame.pts = Some(i as i64 * 20_000);
            regulator.push(&frame);
        }
        let mut out = vec![0.0; 480 * 2];
        regulator.pull(&mut out);
        assert_eq!(regulator.buffered(), 2400);

        // Next frame was expected at 60ms
        let mut frame = ramp_frame(10_000, 960);
        frame.pts = Some(600_000);
        regulator.push(&frame);
        assert_eq!(regulator.buffered(), 2400);
        assert_eq!(regulator.stats().dropped_samples(), 960);
    }

    #[test]
    fn test_contiguous_timestamps_are_not_a_discontinuity() {
        let regulator = AudioRegulator::new(&stereo(), 4800).unwrap();
        for i in 0..4 {
            let mut frame = ramp_frame(i * 960, 960);
            frame.pts = Some(i as i64 * 20_000);
            regulator.push(&frame);
        }
        assert_eq!(regulator.buffered(), 3840);
        assert_eq!(regulator.stats().dropped_samples(), 0);
    }

    #[test]
    #[should_panic(expected = "not a multiple")]
    fn test_pull_rejects_partial_samples() {
        let regulator = AudioRegulator::new(&stereo(), 2400).unwrap();
        let mut out = vec![0.0; 3];
        regulator.pull(&mut out);
    }

    #[test]
    fn test_capacity_must_hold_target() {
        assert!(AudioRegulator::with_capacity(&stereo(), 4800, 1000).is_err());
        let invalid = CodecParams::new(0, 2, SampleFormat::F32);
        assert!(matches!(
            AudioRegulator::new(&invalid, 100),
            Err(AudioError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_concurrent_push_and_pull() {
        let regulator = AudioRegulator::new(&stereo(), 960).unwrap();
        std::thread::scope(|s| {
            s.spawn(|| {
                for i in 0..500 {
                    assert!(regulator.push(&ramp_frame(i * 960, 960)));
                }
            });
            s.spawn(|| {
                let mut out = vec![0.0; 256 * 2];
                for _ in 0..2000 {
                    regulator.pull(&mut out);
                    assert!(regulator.buffered() <= regulator.capacity());
                }
            });
        });
    }

    /// Simulates a producer whose clock runs `producer_ratio` times the
    /// consumer clock, for `seconds` of consumed audio. Returns the regulator
    /// and the average buffering sampled every second.
    fn simulate_drift(producer_ratio: f64, seconds: usize) -> (AudioRegulator, Vec<f32>, u64) {
        let regulator = AudioRegulator::new(&stereo(), 2400).unwrap();
        let frame = AudioFrame::from_f32(None, vec![0.25; 960 * 2]);
        let mut out = vec![0.0; 480 * 2];

        let mut produced_us = 0.0;
        let mut averages = Vec::new();
        let mut underruns_after_start = 0;
        for step in 0..seconds * 100 {
            // Consumer pulls 10ms per step, producer pushes 20ms frames
            produced_us += 10_000.0 * producer_ratio;
            while produced_us >= 20_000.0 {
                regulator.push(&frame);
                produced_us -= 20_000.0;
            }
            regulator.pull(&mut out);

            if step == 99 {
                underruns_after_start = regulator.stats().underruns();
            }
            if step % 100 == 99 {
                averages.push(regulator.stats().average_buffering());
            }
        }
        let late_underruns = regulator.stats().underruns() - underruns_after_start;
        (regulator, averages, late_underruns)
    }

    #[test]
    fn test_fast_producer_converges() {
        let (regulator, averages, late_underruns) = simulate_drift(1.003, 90);

        for avg in &averages[60..] {
            assert!(
                (1200.0..3600.0).contains(avg),
                "average buffering {avg} drifted away from target 2400"
            );
        }
        assert!(regulator.stats().compensation() < 0);
        assert_eq!(late_underruns, 0);
    }

    #[test]
    fn test_slow_producer_converges() {
        let (regulator, averages, late_underruns) = simulate_drift(0.997, 90);

        for avg in &averages[60..] {
            assert!(
                (1200.0..3600.0).contains(avg),
                "average buffering {avg} drifted away from target 2400"
            );
        }
        assert!(regulator.stats().compensation() > 0);
        assert_eq!(late_underruns, 0);
    }

    #[test]
    fn test_matched_clocks_stay_near_target() {
        let (regulator, averages, late_underruns) = simulate_drift(1.0, 20);
        let last = *averages.last().unwrap();
        assert!((2000.0..3000.0).contains(&last), "average {last}");
        assert_eq!(late_underruns, 0);
        assert_eq!(regulator.stats().dropped_samples(), 0);
    }
}
