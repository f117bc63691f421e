use crate::defaults;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub recorder: RecorderConfig,
    pub files: FilesConfig,
    pub detector: DetectorConfig,
    pub scheduler: SchedulerConfig,
}

/// Audio capture and pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecorderConfig {
    /// Substring matched against input device names. Empty = first device.
    pub device_name_contains: String,
    /// Use the Pettersson M500 USB-control source instead of a generic
    /// USB audio device.
    pub pettersson_m500: bool,
    pub in_sampling_rate_hz: u32,
    pub adc_resolution_bits: u16,
    pub channels: u16,
    /// Frames per hardware read.
    pub buffer_size_frames: usize,
    /// Bound of the source → process queue, in buffers.
    pub source_queue_size: usize,
    /// Bound of the process → target queue, in buffers.
    pub target_queue_size: usize,
}

/// Output file naming and rotation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FilesConfig {
    pub dir_path: PathBuf,
    pub prefix: String,
    /// Position string used in filenames when no GPS fix is available.
    pub latlong: String,
    /// Recording format tag, e.g. "TE384" (time expansion) or "FS384" (full scan).
    pub rec_type: String,
    /// Sample rate written to the WAV header. For TE recordings this is the
    /// capture rate divided by the expansion factor.
    pub out_sampling_rate_hz: u32,
    /// Maximum captured seconds per file before rotating to a new one.
    pub max_record_length_s: u32,
    /// Buffers accumulated before a batched write.
    pub write_batch_buffers: usize,
}

/// Sound detection tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectorConfig {
    /// FFT window length in samples; the hop equals the window (no overlap).
    pub window_size: usize,
    /// High-pass cutoff in Hz applied to the spectrum before peak picking.
    pub cutoff_hz: f64,
    /// Peak threshold in dBFS above which a window counts as a detection.
    pub threshold_dbfs: f64,
    /// Buffers forwarded after the last detection (trailing hangover).
    pub post_roll_buffers: usize,
    /// Rolling pre-roll buffer capacity, flushed before the next detection.
    pub pre_roll_buffers: usize,
}

/// Day/night scheduling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub use_gps: bool,
    /// Block scheduler startup until a GPS fix arrives.
    pub wait_for_gps_at_startup: bool,
    /// Decimal degrees, used when GPS is absent or has no fix yet.
    pub latitude: f64,
    pub longitude: f64,
    /// Daily trigger entries: `"action/time-or-solar-event/signed-minutes"`,
    /// e.g. `"scheduler_rec_on/sunset/-10"` or `"scheduler_rec_off/06:30/0"`.
    pub events: Vec<String>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            device_name_contains: "Pettersson".to_string(),
            pettersson_m500: false,
            in_sampling_rate_hz: defaults::IN_SAMPLE_RATE,
            adc_resolution_bits: 16,
            channels: 1,
            buffer_size_frames: defaults::BUFFER_FRAMES,
            source_queue_size: defaults::SOURCE_QUEUE_SIZE,
            target_queue_size: defaults::TARGET_QUEUE_SIZE,
        }
    }
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            dir_path: PathBuf::from("echolog_rec"),
            prefix: "ECHO1".to_string(),
            latlong: "N00.00E00.00".to_string(),
            rec_type: "TE384".to_string(),
            out_sampling_rate_hz: defaults::OUT_SAMPLE_RATE,
            max_record_length_s: defaults::MAX_RECORD_LENGTH_S,
            write_batch_buffers: defaults::WRITE_BATCH_BUFFERS,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            window_size: defaults::DETECT_WINDOW_SIZE,
            cutoff_hz: defaults::DETECT_CUTOFF_HZ,
            threshold_dbfs: defaults::DETECT_THRESHOLD_DBFS,
            post_roll_buffers: defaults::POST_ROLL_BUFFERS,
            pre_roll_buffers: defaults::PRE_ROLL_BUFFERS,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            use_gps: false,
            wait_for_gps_at_startup: false,
            latitude: 0.0,
            longitude: 0.0,
            events: vec![
                "scheduler_rec_on/sunset/-10".to_string(),
                "scheduler_rec_off/sunrise/+10".to_string(),
            ],
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config.normalized())
    }

    /// Load configuration from a file, falling back to defaults if it is
    /// missing or invalid. Config problems are never fatal for a field
    /// recorder; a warning is logged and defaults take over.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "using default configuration");
                Self::default().normalized()
            }
        }
    }

    /// Applies the M500 rate/tag defaults when `pettersson_m500` is set and
    /// the user left the generic-source defaults in place. Explicit values
    /// always win.
    pub fn normalized(mut self) -> Self {
        if self.recorder.pettersson_m500 {
            let generic = RecorderConfig::default();
            let files = FilesConfig::default();
            if self.recorder.in_sampling_rate_hz == generic.in_sampling_rate_hz {
                self.recorder.in_sampling_rate_hz = defaults::M500_IN_SAMPLE_RATE;
            }
            if self.files.out_sampling_rate_hz == files.out_sampling_rate_hz {
                self.files.out_sampling_rate_hz = defaults::M500_OUT_SAMPLE_RATE;
            }
            if self.files.rec_type == files.rec_type {
                self.files.rec_type = "TE500".to_string();
            }
        }
        self
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/echolog/config.toml on Linux
    #[cfg(feature = "cli")]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("echolog")
            .join("config.toml")
    }
}
