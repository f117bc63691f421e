//! Data types flowing through the sound stream pipeline.

use std::time::SystemTime;

/// A timestamped chunk of raw audio captured from the microphone.
///
/// Immutable once produced; ownership moves along the pipeline so memory
/// stays bounded by the queue capacities.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedBuffer {
    /// Wall-clock time at which the first sample was captured.
    pub capture_time: SystemTime,
    /// PCM samples (16-bit signed integers).
    pub samples: Vec<i16>,
}

impl TimedBuffer {
    /// Creates a new timed buffer.
    pub fn new(capture_time: SystemTime, samples: Vec<i16>) -> Self {
        Self {
            capture_time,
            samples,
        }
    }

    /// Number of sample frames in this buffer (mono: one sample per frame).
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// One element on a pipeline queue.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    /// Audio to be analyzed or written.
    Data(TimedBuffer),
    /// Control marker: the stream has gone silent, close any open output
    /// file. May be emitted repeatedly while silence lasts; receivers must
    /// treat it as idempotent.
    Silence,
    /// Control marker: the upstream producer is done. Pushed exactly once
    /// per producer and never followed by further items from it.
    EndOfStream,
}

impl StreamItem {
    /// Returns true for the `Data` variant.
    pub fn is_data(&self) -> bool {
        matches!(self, StreamItem::Data(_))
    }
}
