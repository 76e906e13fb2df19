//! Buffering-depth compensation.
//!
//! [`CompensationController`] watches the buffering level seen by the
//! consumer and periodically decides how many samples should be added to (or
//! removed from) the stream. [`Compensator`] applies that decision on the
//! producer side as an evenly spaced insert/drop cadence, so that the
//! correction never happens as a single audible jump.

const AVERAGE_RANGE: u32 = 128;

/// Compensation engages above this deviation...
const ENABLE_THRESHOLD_MS: u32 = 4;
/// ...and disengages below this one.
const DISABLE_THRESHOLD_MS: u32 = 1;

/// A correction is spread over this much input audio.
const COMPENSATION_DISTANCE_SECS: u32 = 4;
/// Max correction is 1/50 = 2% of the playback rate.
const MAX_COMPENSATION_DIVISOR: u32 = 50;

/// Cumulative moving average over the last `range` values (approximately).
#[derive(Debug, Clone)]
pub struct RunningAverage {
    range: u32,
    count: u32,
    avg: f32,
}

impl RunningAverage {
    pub fn new(range: u32) -> Self {
        assert!(range > 0);
        Self {
            range,
            count: 0,
            avg: 0.0,
        }
    }

    pub fn push(&mut self, value: f32) {
        if self.count < self.range {
            self.count += 1;
        }
        self.avg = ((self.count - 1) as f32 * self.avg + value) / self.count as f32;
    }

    /// Shifts the average instantly, without smoothing. Never goes below zero.
    pub fn adjust(&mut self, delta: f32) {
        self.avg = (self.avg + delta).max(0.0);
    }

    pub fn get(&self) -> f32 {
        self.avg
    }
}

/// Add `delta` samples (remove, if negative) over the next `distance` input
/// samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Compensation {
    pub delta: i32,
    pub distance: u32,
}

/// Result of a periodic compensation decision, reported for logging.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompensationUpdate {
    pub compensation: Compensation,
    pub average: f32,
    pub level: usize,
}

#[derive(Debug, Clone)]
pub struct CompensationController {
    sample_rate: u32,
    target: u32,
    average: RunningAverage,
    consumed_since_update: u32,
    active: bool,
}

impl CompensationController {
    pub fn new(sample_rate: u32, target: u32) -> Self {
        Self {
            sample_rate,
            target,
            average: RunningAverage::new(AVERAGE_RANGE),
            consumed_since_update: 0,
            active: false,
        }
    }

    /// Records the buffering level observed when the consumer asked for data.
    pub fn observe(&mut self, level: usize) {
        self.average.push(level as f32);
    }

    /// Applies an instant change of the buffering level: samples inserted
    /// (silence, compensation) or removed (dropped on overflow).
    pub fn adjust(&mut self, delta: i64) {
        self.average.adjust(delta as f32);
    }

    pub fn average(&self) -> f32 {
        self.average.get()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Accounts for `consumed` samples handed to the output. Once per second
    /// of consumed audio, returns a new compensation to apply.
    pub fn on_consumed(&mut self, consumed: usize, level: usize) -> Option<CompensationUpdate> {
        self.consumed_since_update = self
            .consumed_since_update
            .saturating_add(u32::try_from(consumed).unwrap_or(u32::MAX));
        if self.consumed_since_update < self.sample_rate {
            return None;
        }
        self.consumed_since_update = 0;

        let average = self.average.get();
        let mut diff = (self.target as f32 - average) as i32;

        let threshold_ms = if self.active {
            DISABLE_THRESHOLD_MS
        } else {
            ENABLE_THRESHOLD_MS
        };
        let threshold = (self.sample_rate * threshold_ms / 1000) as i32;

        if diff.abs() < threshold {
            // Small deviations are just noise.
            diff = 0;
        } else if diff < 0 && level < self.target as usize {
            // Speeding up while the instant level is already low would
            // cause underruns.
            diff = 0;
        }

        let distance = self.sample_rate * COMPENSATION_DISTANCE_SECS;
        let max_diff = (distance / MAX_COMPENSATION_DIVISOR) as i32;
        let delta = diff.clamp(-max_diff, max_diff);

        self.active = delta != 0;

        Some(CompensationUpdate {
            compensation: Compensation { delta, distance },
            average,
            level,
        })
    }
}

/// Applies a [`Compensation`] to interleaved samples.
#[derive(Debug, Clone)]
pub struct Compensator {
    channels: usize,
    delta: i32,
    distance: u64,
    /// Input samples still covered by the current compensation.
    remaining: u64,
    accumulator: u64,
    previous: Vec<f32>,
    has_previous: bool,
}

impl Compensator {
    pub fn new(channels: usize) -> Self {
        Self {
            channels,
            delta: 0,
            distance: 0,
            remaining: 0,
            accumulator: 0,
            previous: vec![0.0; channels],
            has_previous: false,
        }
    }

    pub fn set(&mut self, compensation: Compensation) {
        self.delta = compensation.delta;
        self.distance = compensation.distance as u64;
        self.remaining = if compensation.delta == 0 {
            0
        } else {
            compensation.distance as u64
        };
        self.accumulator = 0;
    }

    pub fn delta(&self) -> i32 {
        self.delta
    }

    /// Appends `input` to `out`, inserting or dropping samples according to
    /// the current compensation. Returns the number of samples added
    /// (negative when samples were removed).
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) -> i64 {
        let ch = self.channels;
        let magnitude = self.delta.unsigned_abs() as u64;
        let mut net = 0;

        out.reserve(input.len() + ch);
        for sample in input.chunks_exact(ch) {
            let mut event = false;
            if self.remaining > 0 {
                self.remaining -= 1;
                self.accumulator += magnitude;
                if self.accumulator >= self.distance {
                    self.accumulator -= self.distance;
                    event = true;
                }
            }

            if !event {
                out.extend_from_slice(sample);
            } else if self.delta > 0 {
                let previous = if self.has_previous {
                    &self.previous[..]
                } else {
                    sample
                };
                out.extend(previous.iter().zip(sample).map(|(a, b)| (a + b) * 0.5));
                out.extend_from_slice(sample);
                net += 1;
            } else {
                // Blend the dropped sample into the last emitted one.
                let len = out.len();
                if len >= ch {
                    for (o, s) in out[len - ch..].iter_mut().zip(sample) {
                        *o = (*o + *s) * 0.5;
                    }
                }
                net -= 1;
            }

            self.previous.copy_from_slice(sample);
            self.has_previous = true;
        }

        net
    }
}
