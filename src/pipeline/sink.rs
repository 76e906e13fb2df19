//! Consumers of a decoded audio stream.
//!
//! A decoder does not know what happens to its frames: it opens its sinks with
//! the stream's [`CodecParams`], pushes every decoded frame, then closes them.

use tracing::warn;

use crate::audio::{AudioFrame, CodecParams};
use crate::error::AudioError;

/// Capability implemented by anything that consumes decoded frames.
pub trait FrameSink {
    fn open(&mut self, params: &CodecParams) -> Result<(), AudioError>;

    fn close(&mut self);

    /// Returns `false` if the frame could not be accepted. The stream goes on.
    fn push(&mut self, frame: &AudioFrame) -> bool;
}

/// Forwards one stream to several sinks.
///
/// Sinks are opened in order. If one fails, the ones already opened are
/// closed again (last first) and the error is returned.
#[derive(Default)]
pub struct SinkTee {
    sinks: Vec<Box<dyn FrameSink>>,
    opened: usize,
}

impl SinkTee {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, sink: Box<dyn FrameSink>) {
        assert!(self.opened == 0, "cannot add a sink to an opened tee");
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    fn close_opened(&mut self) {
        for sink in self.sinks[..self.opened].iter_mut().rev() {
            sink.close();
        }
        self.opened = 0;
    }
}

impl FrameSink for SinkTee {
    fn open(&mut self, params: &CodecParams) -> Result<(), AudioError> {
        for i in 0..self.sinks.len() {
            if let Err(e) = self.sinks[i].open(params) {
                self.close_opened();
                return Err(e);
            }
            self.opened = i + 1;
        }
        Ok(())
    }

    fn close(&mut self) {
        self.close_opened();
    }

    fn push(&mut self, frame: &AudioFrame) -> bool {
        let mut ok = true;
        for (i, sink) in self.sinks[..self.opened].iter_mut().enumerate() {
            if !sink.push(frame) {
                warn!("Sink {} rejected a frame", i);
                ok = false;
            }
        }
        ok
    }
}
