//! Audio source capability.
//!
//! The pipeline's source stage consumes this trait; concrete providers are
//! the cpal-backed capture (feature `cpal-audio`), the Pettersson M500
//! USB-control source, and [`MockAudioSource`] for tests.

use crate::error::{EchologError, Result};
use std::time::Duration;

/// A device that yields buffers of 16-bit PCM samples.
pub trait AudioSource: Send {
    /// Open the device and start the stream.
    fn open(&mut self) -> Result<()>;

    /// Read up to `frames` frames, blocking at most `timeout`.
    ///
    /// Returns an empty vector when the device has ended (no more data will
    /// ever arrive), or `EchologError::SourceReadTimeout` when the timeout
    /// elapsed — callers re-check their stop flag and retry.
    fn read(&mut self, frames: usize, timeout: Duration) -> Result<Vec<i16>>;

    /// Stop the stream and release the device.
    fn close(&mut self);
}

/// Mock audio source yielding a scripted sequence of buffers.
pub struct MockAudioSource {
    buffers: Vec<Vec<i16>>,
    position: usize,
    is_open: bool,
    looping: bool,
    fail_open: Option<String>,
    fail_read_at: Option<usize>,
}

impl MockAudioSource {
    /// Creates a source that yields each buffer once, then ends.
    pub fn new(buffers: Vec<Vec<i16>>) -> Self {
        Self {
            buffers,
            position: 0,
            is_open: false,
            looping: false,
            fail_open: None,
            fail_read_at: None,
        }
    }

    /// Configure the mock to cycle through its buffers forever instead of
    /// ending. Emulates a live device for shutdown tests.
    pub fn looping(mut self) -> Self {
        self.looping = true;
        self
    }

    /// Configure the mock to fail on open.
    pub fn with_open_failure(mut self, message: &str) -> Self {
        self.fail_open = Some(message.to_string());
        self
    }

    /// Configure the mock to fail on the n-th read (0-based).
    pub fn with_read_failure_at(mut self, index: usize) -> Self {
        self.fail_read_at = Some(index);
        self
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }
}

impl AudioSource for MockAudioSource {
    fn open(&mut self) -> Result<()> {
        if let Some(message) = &self.fail_open {
            return Err(EchologError::SourceOpen {
                message: message.clone(),
            });
        }
        self.is_open = true;
        Ok(())
    }

    fn read(&mut self, _frames: usize, _timeout: Duration) -> Result<Vec<i16>> {
        if self.fail_read_at == Some(self.position) {
            return Err(EchologError::SourceRead {
                message: "mock read failure".to_string(),
            });
        }
        if self.looping && !self.buffers.is_empty() {
            self.position %= self.buffers.len();
        }
        match self.buffers.get(self.position) {
            Some(buffer) => {
                self.position += 1;
                Ok(buffer.clone())
            }
            None => Ok(Vec::new()),
        }
    }

    fn close(&mut self) {
        self.is_open = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(10);

    #[test]
    fn mock_yields_buffers_then_ends() {
        let mut source = MockAudioSource::new(vec![vec![1, 2], vec![3, 4]]);
        source.open().unwrap();
        assert!(source.is_open());

        assert_eq!(source.read(2, TIMEOUT).unwrap(), vec![1, 2]);
        assert_eq!(source.read(2, TIMEOUT).unwrap(), vec![3, 4]);
        assert!(source.read(2, TIMEOUT).unwrap().is_empty());
        assert!(source.read(2, TIMEOUT).unwrap().is_empty());

        source.close();
        assert!(!source.is_open());
    }

    #[test]
    fn mock_open_failure() {
        let mut source = MockAudioSource::new(vec![]).with_open_failure("no device");
        let err = source.open().unwrap_err();
        assert!(matches!(err, EchologError::SourceOpen { .. }));
        assert!(!source.is_open());
    }

    #[test]
    fn mock_read_failure_at_index() {
        let mut source =
            MockAudioSource::new(vec![vec![1], vec![2]]).with_read_failure_at(1);
        source.open().unwrap();
        assert_eq!(source.read(1, TIMEOUT).unwrap(), vec![1]);
        assert!(source.read(1, TIMEOUT).is_err());
    }

    #[test]
    fn trait_is_object_safe() {
        let mut source: Box<dyn AudioSource> = Box::new(MockAudioSource::new(vec![vec![9]]));
        source.open().unwrap();
        assert_eq!(source.read(1, TIMEOUT).unwrap(), vec![9]);
        source.close();
    }
}
