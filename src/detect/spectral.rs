//! FFT peak detector.
//!
//! Classifies a buffer by scanning non-overlapping windows: Blackman-Harris
//! window, real-input FFT, high-pass at the configured cutoff, then a peak
//! search in dBFS. The first window whose peak clears the threshold decides.

use crate::defaults;
use crate::detect::SoundDetector;
use crate::stream::item::TimedBuffer;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// Magnitude assigned to filtered-out bins. Must stay above zero so the
/// dBFS conversion never hits log10(0).
const FILTERED_BIN_MAGNITUDE: f64 = 1e-9;

/// Configuration for [`SpectralPeakDetector`].
#[derive(Debug, Clone, Copy)]
pub struct SpectralPeakConfig {
    /// Capture sample rate in Hz.
    pub sampling_rate_hz: u32,
    /// Analysis window length in samples; the hop equals the window length.
    pub window_size: usize,
    /// Bins below this frequency are excluded from peak picking.
    pub cutoff_hz: f64,
    /// Detection threshold in dBFS.
    pub threshold_dbfs: f64,
}

impl Default for SpectralPeakConfig {
    fn default() -> Self {
        Self {
            sampling_rate_hz: defaults::IN_SAMPLE_RATE,
            window_size: defaults::DETECT_WINDOW_SIZE,
            cutoff_hz: defaults::DETECT_CUTOFF_HZ,
            threshold_dbfs: defaults::DETECT_THRESHOLD_DBFS,
        }
    }
}

/// Sliding-window FFT peak detector.
pub struct SpectralPeakDetector {
    config: SpectralPeakConfig,
    window: Vec<f64>,
    /// Coherent gain of the window: the peak magnitude a full-scale tone can
    /// reach. dBFS values are relative to this.
    dbfs_max: f64,
    bin_hz: f64,
    fft: Arc<dyn Fft<f64>>,
    scratch: Vec<Complex<f64>>,
}

impl SpectralPeakDetector {
    /// Creates a detector with default tuning.
    pub fn new() -> Self {
        Self::with_config(SpectralPeakConfig::default())
    }

    /// Creates a detector with custom tuning.
    pub fn with_config(config: SpectralPeakConfig) -> Self {
        let window = blackman_harris(config.window_size);
        let dbfs_max = window.iter().sum::<f64>() / 2.0;
        let bin_hz = config.sampling_rate_hz as f64 / config.window_size as f64;
        let fft = FftPlanner::<f64>::new().plan_fft_forward(config.window_size);
        let scratch = vec![Complex::new(0.0, 0.0); config.window_size];

        Self {
            config,
            window,
            dbfs_max,
            bin_hz,
            fft,
            scratch,
        }
    }

    /// Peak level of one window in dBFS, together with the peak frequency.
    fn window_peak(&mut self, frame: &[i16]) -> (f64, f64) {
        for (i, &sample) in frame.iter().enumerate() {
            // Transform to [-1, 1) and apply the window function.
            let value = sample as f64 / 32768.0 * self.window[i];
            self.scratch[i] = Complex::new(value, 0.0);
        }
        self.fft.process(&mut self.scratch);

        // Half spectrum only; the input is real.
        let mut peak_db = f64::NEG_INFINITY;
        let mut peak_hz = 0.0;
        for (k, bin) in self.scratch.iter().enumerate().take(self.config.window_size / 2 + 1) {
            let freq_hz = k as f64 * self.bin_hz;
            let magnitude = if freq_hz < self.config.cutoff_hz {
                FILTERED_BIN_MAGNITUDE
            } else {
                bin.norm()
            };
            let db = 20.0 * (magnitude / self.dbfs_max).log10();
            if db > peak_db {
                peak_db = db;
                peak_hz = freq_hz;
            }
        }
        (peak_db, peak_hz)
    }
}

impl Default for SpectralPeakDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl SoundDetector for SpectralPeakDetector {
    fn check_for_sound(&mut self, buffer: &TimedBuffer) -> bool {
        let window_size = self.config.window_size;
        let mut offset = 0;
        while offset + window_size <= buffer.samples.len() {
            let frame = &buffer.samples[offset..offset + window_size];
            offset += window_size;

            let (peak_db, peak_hz) = self.window_peak(frame);
            if peak_db > self.config.threshold_dbfs {
                tracing::debug!(peak_hz, peak_db, "sound detected");
                return true;
            }
        }
        false
    }
}

/// Symmetric 4-term Blackman-Harris window.
fn blackman_harris(size: usize) -> Vec<f64> {
    const A0: f64 = 0.35875;
    const A1: f64 = 0.48829;
    const A2: f64 = 0.14128;
    const A3: f64 = 0.01168;

    let denom = (size - 1) as f64;
    (0..size)
        .map(|n| {
            let x = std::f64::consts::TAU * n as f64 / denom;
            A0 - A1 * x.cos() + A2 * (2.0 * x).cos() - A3 * (3.0 * x).cos()
        })
        .collect()
}
