//! Source stage: pulls buffers from an audio capability and feeds the pipeline.

use crate::audio::source::AudioSource;
use crate::error::EchologError;
use crate::events::EventSink;
use crate::stream::item::{StreamItem, TimedBuffer};
use crate::stream::stage::SourceStage;
use crossbeam_channel::Sender;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

/// Generic PCM source over an [`AudioSource`] capability.
///
/// Backpressure policy: when the outbound queue is full this stage blocks
/// rather than dropping — frames represent audio the OS has already
/// captured, and the device-side buffering is short. The read timeout keeps
/// the stop flag observable even when the device stalls.
pub struct PcmSource {
    audio: Box<dyn AudioSource>,
    buffer_frames: usize,
    read_timeout: Duration,
    events: Arc<dyn EventSink>,
}

impl PcmSource {
    pub fn new(
        audio: Box<dyn AudioSource>,
        buffer_frames: usize,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            audio,
            buffer_frames,
            read_timeout: Duration::from_millis(crate::defaults::READ_TIMEOUT_MS),
            events,
        }
    }

    /// Overrides the hardware read timeout.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }
}

impl SourceStage for PcmSource {
    fn name(&self) -> &'static str {
        "pcm_source"
    }

    fn run(&mut self, out: &Sender<StreamItem>, active: &AtomicBool) {
        if let Err(e) = self.audio.open() {
            tracing::error!(error = %e, "failed to open audio source");
            self.events.emit("rec_source_error");
            let _ = out.send(StreamItem::EndOfStream);
            return;
        }

        while active.load(Ordering::SeqCst) {
            match self.audio.read(self.buffer_frames, self.read_timeout) {
                Ok(samples) if samples.is_empty() => {
                    tracing::debug!("audio source ended");
                    break;
                }
                Ok(samples) => {
                    let buffer = TimedBuffer::new(SystemTime::now(), samples);
                    if out.send(StreamItem::Data(buffer)).is_err() {
                        // Downstream is gone; nothing left to feed.
                        break;
                    }
                }
                Err(EchologError::SourceReadTimeout) => {
                    // No data within one read period; re-check the stop flag.
                    continue;
                }
                Err(e) => {
                    tracing::error!(error = %e, "audio source read failed");
                    self.events.emit("rec_source_error");
                    break;
                }
            }
        }

        tracing::debug!("source terminated");
        let _ = out.send(StreamItem::EndOfStream);
        self.audio.close();
    }
}
