//! Default configuration constants for echolog.
//!
//! Single home for the tuning values shared between the config section
//! defaults and the stand-alone component constructors.

/// Default input sample rate in Hz for generic USB ultrasonic microphones.
///
/// 384 kHz covers the full echolocation range of European bat species
/// (Nyquist at 192 kHz) and matches the Pettersson M500-384.
pub const IN_SAMPLE_RATE: u32 = 384_000;

/// Default output (WAV header) sample rate in Hz.
///
/// 38.4 kHz is the time-expanded (TE, 10x) playback rate for 384 kHz captures,
/// so standard audio tools can play the files back slowed down.
pub const OUT_SAMPLE_RATE: u32 = 38_400;

/// Input sample rate in Hz for the Pettersson M500 (500 kHz variant).
pub const M500_IN_SAMPLE_RATE: u32 = 500_000;

/// Output (WAV header) sample rate in Hz for M500 recordings (TE, 10x).
pub const M500_OUT_SAMPLE_RATE: u32 = 50_000;

/// Default capture buffer size in frames.
///
/// 2^16 frames is ~170 ms at 384 kHz — large enough to amortize per-read
/// overhead, small enough that the stop flag is observed within one read.
pub const BUFFER_FRAMES: usize = 1024 * 64;

/// Default bound of the source → process queue, in buffers.
pub const SOURCE_QUEUE_SIZE: usize = 100;

/// Default bound of the process → target queue, in buffers.
pub const TARGET_QUEUE_SIZE: usize = 200;

/// Timeout for a single hardware read, in milliseconds.
///
/// Bounded so the cooperative stop flag is observed within roughly one
/// buffer period even if the device stalls.
pub const READ_TIMEOUT_MS: u64 = 2_000;

/// Spectral analysis window length in samples (also the hop — windows do not overlap).
pub const DETECT_WINDOW_SIZE: usize = 2048;

/// High-pass cutoff in Hz. Spectrum bins below this are excluded from peak
/// picking to reject low-frequency (non-bat) noise.
pub const DETECT_CUTOFF_HZ: f64 = 15_000.0;

/// Detection threshold in dBFS. A window whose spectral peak exceeds this
/// counts as bat-call activity.
pub const DETECT_THRESHOLD_DBFS: f64 = -50.0;

/// Buffers forwarded after the last detection (trailing hangover).
pub const POST_ROLL_BUFFERS: usize = 6;

/// Rolling pre-roll capacity in buffers, flushed ahead of the next detection.
pub const PRE_ROLL_BUFFERS: usize = 24;

/// Number of buffers collected before a batched write to the WAV file.
pub const WRITE_BATCH_BUFFERS: usize = 10;

/// Maximum length of a single WAV file in seconds of captured audio.
pub const MAX_RECORD_LENGTH_S: u32 = 300;

/// Delay between enqueuing consecutive actions of one state-machine event,
/// in milliseconds. Bounds action-queue pressure and lets other event
/// producers interleave.
pub const ACTION_DELAY_MS: u64 = 100;

/// Solar time cache entries kept before the cache is cleared.
pub const SOLAR_CACHE_MAX: usize = 1000;

/// Fallback solar times (HH:MM) used when the solar computation fails,
/// e.g. polar day or night.
pub const FALLBACK_SUNSET: (u32, u32) = (18, 0);
pub const FALLBACK_DUSK: (u32, u32) = (18, 20);
pub const FALLBACK_DAWN: (u32, u32) = (5, 40);
pub const FALLBACK_SUNRISE: (u32, u32) = (6, 0);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_rate_is_time_expanded_in_rate() {
        assert_eq!(IN_SAMPLE_RATE / 10, OUT_SAMPLE_RATE);
        assert_eq!(M500_IN_SAMPLE_RATE / 10, M500_OUT_SAMPLE_RATE);
    }

    #[test]
    fn detect_window_fits_in_buffer() {
        assert!(BUFFER_FRAMES >= DETECT_WINDOW_SIZE);
        assert_eq!(BUFFER_FRAMES % DETECT_WINDOW_SIZE, 0);
    }
}
