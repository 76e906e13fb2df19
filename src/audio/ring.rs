//! Fixed-capacity ring of interleaved f32 samples.
//!
//! Positions and counts are expressed in samples (one value per channel at a
//! given instant). The ring never grows: writing into a full ring discards the
//! oldest unread samples.

use crate::error::{AudioError, try_alloc_zeroed};

pub struct SampleRing {
    data: Box<[f32]>,
    channels: usize,
    capacity: usize,
    /// Read position.
    head: usize,
    /// Number of unread samples, in `[0, capacity]`.
    len: usize,
}

impl std::fmt::Debug for SampleRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleRing")
            .field("channels", &self.channels)
            .field("capacity", &self.capacity)
            .field("head", &self.head)
            .field("len", &self.len)
            .finish()
    }
}

impl SampleRing {
    pub fn new(capacity: usize, channels: usize) -> Result<Self, AudioError> {
        assert!(capacity > 0, "ring capacity must be positive");
        assert!(channels > 0, "ring channel count must be positive");
        let data = try_alloc_zeroed(capacity * channels, "audio ring buffer")?;
        Ok(Self {
            data: data.into_boxed_slice(),
            channels,
            capacity,
            head: 0,
            len: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Number of samples available to read.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends interleaved samples, dropping the oldest ones if there is not
    /// enough room. Returns the number of samples dropped.
    pub fn write(&mut self, samples: &[f32]) -> usize {
        let ch = self.channels;
        debug_assert_eq!(samples.len() % ch, 0);

        let mut src = samples;
        let mut count = samples.len() / ch;
        let mut dropped = 0;

        if count > self.capacity {
            // Only the most recent `capacity` samples can ever be kept.
            let excess = count - self.capacity;
            src = &src[excess * ch..];
            count = self.capacity;
            dropped += excess;
        }

        let overflow = (self.len + count).saturating_sub(self.capacity);
        if overflow > 0 {
            dropped += self.skip(overflow);
        }

        let tail = (self.head + self.len) % self.capacity;
        let first = count.min(self.capacity - tail);
        self.data[tail * ch..(tail + first) * ch].copy_from_slice(&src[..first * ch]);
        self.data[..(count - first) * ch].copy_from_slice(&src[first * ch..count * ch]);
        self.len += count;

        dropped
    }

    /// Copies up to `out.len() / channels` samples into `out`. Returns the
    /// number of samples read; the rest of `out` is left untouched.
    pub fn read(&mut self, out: &mut [f32]) -> usize {
        let ch = self.channels;
        let count = (out.len() / ch).min(self.len);
        let first = count.min(self.capacity - self.head);

        out[..first * ch].copy_from_slice(&self.data[self.head * ch..(self.head + first) * ch]);
        out[first * ch..count * ch].copy_from_slice(&self.data[..(count - first) * ch]);

        self.skip(count)
    }

    /// Discards up to `count` of the oldest samples. Returns how many were
    /// discarded.
    pub fn skip(&mut self, count: usize) -> usize {
        let n = count.min(self.len);
        self.head = (self.head + n) % self.capacity;
        self.len -= n;
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(start: usize, count: usize, channels: usize) -> Vec<f32> {
        (start..start + count)
            .flat_map(|i| std::iter::repeat(i as f32).take(channels))
            .collect()
    }

    #[test]
    fn test_write_then_read_in_order() {
        let mut ring = SampleRing::new(8, 2).unwrap();
        assert_eq!(ring.write(&ramp(0, 5, 2)), 0);
        assert_eq!(ring.len(), 5);

        let mut out = vec![-1.0; 6];
        assert_eq!(ring.read(&mut out), 3);
        assert_eq!(out, ramp(0, 3, 2));
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn test_wraparound() {
        let mut ring = SampleRing::new(4, 1).unwrap();
        ring.write(&ramp(0, 3, 1));
        let mut out = vec![0.0; 2];
        ring.read(&mut out);
        ring.write(&ramp(3, 3, 1));
        assert_eq!(ring.len(), 4);

        let mut out = vec![0.0; 4];
        assert_eq!(ring.read(&mut out), 4);
        assert_eq!(out, vec![2.0, 3.0, 4.0, 5.0]);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let mut ring = SampleRing::new(4, 1).unwrap();
        ring.write(&ramp(0, 3, 1));
        assert_eq!(ring.write(&ramp(3, 3, 1)), 2);
        assert_eq!(ring.len(), 4);

        let mut out = vec![0.0; 4];
        ring.read(&mut out);
        assert_eq!(out, vec![2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_oversized_write_keeps_most_recent() {
        let mut ring = SampleRing::new(4, 2).unwrap();
        ring.write(&ramp(0, 2, 2));
        assert_eq!(ring.write(&ramp(2, 6, 2)), 4);
        assert_eq!(ring.len(), 4);

        let mut out = vec![0.0; 8];
        ring.read(&mut out);
        assert_eq!(out, ramp(4, 4, 2));
    }

    #[test]
    fn test_read_from_empty_leaves_output_untouched() {
        let mut ring = SampleRing::new(4, 1).unwrap();
        let mut out = vec![7.0; 3];
        assert_eq!(ring.read(&mut out), 0);
        assert_eq!(out, vec![7.0; 3]);
    }

    #[test]
    fn test_skip_is_bounded() {
        let mut ring = SampleRing::new(4, 1).unwrap();
        ring.write(&ramp(0, 2, 1));
        assert_eq!(ring.skip(10), 2);
        assert!(ring.is_empty());
    }
}
