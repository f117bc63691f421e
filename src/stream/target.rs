//! Target stage: writes detected audio to timestamped WAV files.

use crate::gps::GpsReader;
use crate::stream::item::{StreamItem, TimedBuffer};
use crate::stream::stage::{StageError, TargetStage};
use chrono::{DateTime, Local};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

/// File naming, format and rotation settings for [`WavTarget`].
#[derive(Debug, Clone)]
pub struct WavTargetConfig {
    pub dir_path: PathBuf,
    pub prefix: String,
    /// Position string used when the GPS reader has no fix.
    pub latlong: String,
    /// Format tag appended to file names, e.g. "TE384".
    pub rec_type: String,
    /// Sample rate written to the WAV header (time-expanded rate for TE).
    pub out_sampling_rate_hz: u32,
    pub channels: u16,
    /// Capture rate; with `max_record_length_s` this bounds the frames per file.
    pub in_sampling_rate_hz: u32,
    pub max_record_length_s: u32,
    /// Buffers accumulated before a batched write.
    pub write_batch_buffers: usize,
}

impl Default for WavTargetConfig {
    fn default() -> Self {
        Self {
            dir_path: PathBuf::from("echolog_rec"),
            prefix: "ECHO1".to_string(),
            latlong: "N00.00E00.00".to_string(),
            rec_type: "TE384".to_string(),
            out_sampling_rate_hz: crate::defaults::OUT_SAMPLE_RATE,
            channels: 1,
            in_sampling_rate_hz: crate::defaults::IN_SAMPLE_RATE,
            max_record_length_s: crate::defaults::MAX_RECORD_LENGTH_S,
            write_batch_buffers: crate::defaults::WRITE_BATCH_BUFFERS,
        }
    }
}

/// WAV file writer stage.
///
/// Opens a file on the first `Data` item after a closed state, batches
/// frames to amortize I/O, closes on `Silence`, and rotates to a fresh file
/// when a single file reaches the configured maximum capture length —
/// without losing a frame across the boundary.
pub struct WavTarget {
    config: WavTargetConfig,
    gps: Arc<dyn GpsReader>,
    writer: Option<WavWriter<BufWriter<fs::File>>>,
    pending: Vec<Vec<i16>>,
    /// Frames appended to the current file, flushed or not.
    frames_in_file: u64,
    max_file_frames: u64,
}

impl WavTarget {
    pub fn new(config: WavTargetConfig, gps: Arc<dyn GpsReader>) -> Self {
        let max_file_frames =
            config.max_record_length_s as u64 * config.in_sampling_rate_hz as u64;
        Self {
            config,
            gps,
            writer: None,
            pending: Vec::new(),
            frames_in_file: 0,
            max_file_frames,
        }
    }

    /// Builds `{prefix}_{timestamp}_{latlong}_{rec_type}.wav`, preferring
    /// GPS time and position over the capture clock and configured default.
    fn file_name(&self, capture_time: SystemTime) -> String {
        let timestamp = self.gps.get_time_local_string().unwrap_or_else(|| {
            DateTime::<Local>::from(capture_time)
                .format("%Y%m%dT%H%M%S%z")
                .to_string()
        });
        let latlong = self
            .gps
            .get_latlong_string()
            .unwrap_or_else(|| self.config.latlong.clone());
        format!(
            "{}_{}_{}_{}.wav",
            self.config.prefix, timestamp, latlong, self.config.rec_type
        )
    }

    fn open_file(&mut self, capture_time: SystemTime) -> Result<(), StageError> {
        fs::create_dir_all(&self.config.dir_path)
            .map_err(|e| StageError::Fatal(format!("create recording dir: {}", e)))?;

        let path = self.config.dir_path.join(self.file_name(capture_time));
        let spec = WavSpec {
            channels: self.config.channels,
            sample_rate: self.config.out_sampling_rate_hz,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(&path, spec)
            .map_err(|e| StageError::Fatal(format!("open {}: {}", path.display(), e)))?;

        tracing::info!(path = %path.display(), "new wave file");
        self.writer = Some(writer);
        self.frames_in_file = 0;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StageError> {
        let Some(writer) = self.writer.as_mut() else {
            self.pending.clear();
            return Ok(());
        };
        for chunk in self.pending.drain(..) {
            for sample in chunk {
                writer
                    .write_sample(sample)
                    .map_err(|e| StageError::Fatal(format!("write frames: {}", e)))?;
            }
        }
        Ok(())
    }

    fn close_file(&mut self) -> Result<(), StageError> {
        if let Some(writer) = self.writer.take() {
            writer
                .finalize()
                .map_err(|e| StageError::Fatal(format!("close wave file: {}", e)))?;
            tracing::info!("wave file closed");
        }
        self.frames_in_file = 0;
        Ok(())
    }

    /// True while a file is open, for tests.
    pub fn is_file_open(&self) -> bool {
        self.writer.is_some()
    }
}

impl TargetStage for WavTarget {
    fn name(&self) -> &'static str {
        "wav_target"
    }

    fn consume(&mut self, item: StreamItem) -> Result<(), StageError> {
        match item {
            StreamItem::Data(TimedBuffer {
                capture_time,
                samples,
            }) => {
                if self.writer.is_none() {
                    self.open_file(capture_time)?;
                }
                self.frames_in_file += samples.len() as u64 / self.config.channels as u64;
                self.pending.push(samples);

                if self.pending.len() >= self.config.write_batch_buffers {
                    self.flush()?;
                }
                // Rotate: close now, the next Data item opens the successor.
                // Frames already appended stay in this file, so the boundary
                // is gap-free.
                if self.frames_in_file >= self.max_file_frames {
                    self.flush()?;
                    self.close_file()?;
                }
                Ok(())
            }
            StreamItem::Silence => {
                // Idempotent: nothing to do when no file is open.
                if self.writer.is_some() {
                    self.flush()?;
                    self.close_file()?;
                }
                Ok(())
            }
            StreamItem::EndOfStream => {
                self.shutdown();
                Ok(())
            }
        }
    }

    fn discard_pending(&mut self) {
        self.pending.clear();
        if let Some(writer) = self.writer.take() {
            // Keep what already hit the disk; the header still gets fixed up.
            if let Err(e) = writer.finalize() {
                tracing::error!(error = %e, "failed to finalize wave file on discard");
            }
        }
        self.frames_in_file = 0;
    }

    fn shutdown(&mut self) {
        if let Err(e) = self.flush() {
            tracing::error!(error = %e, "failed to flush wave file on shutdown");
        }
        if let Err(e) = self.close_file() {
            tracing::error!(error = %e, "failed to close wave file on shutdown");
        }
    }
}
