//! Real audio capture using CPAL (Cross-Platform Audio Library).
//!
//! Generic USB ultrasonic microphones (including the Pettersson M500-384)
//! enumerate as standard audio-class devices, so plain input streams at
//! their native rate are all that is needed.

use crate::audio::source::AudioSource;
use crate::error::{EchologError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Runs a closure with stderr redirected to /dev/null.
///
/// Probing audio backends makes ALSA/JACK/PipeWire print spurious warnings
/// on stderr, which would end up interleaved with the recorder's own log.
///
/// # Safety
/// Saves and restores file descriptor 2 via `libc::dup`/`libc::dup2`; no
/// other thread may manipulate fd 2 concurrently.
fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Names of all available audio input devices.
pub fn list_input_devices() -> Result<Vec<String>> {
    let (host, devices) = with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let devices = host.input_devices();
        (host, devices)
    });
    let _ = host; // keep host alive while iterating devices
    let devices = devices.map_err(|e| EchologError::SourceOpen {
        message: format!("Failed to enumerate input devices: {}", e),
    })?;

    Ok(devices.filter_map(|device| device.name().ok()).collect())
}

/// Find the first input device whose name contains `name_contains`
/// (case-insensitive). An empty pattern selects the system default.
fn find_device(name_contains: &str) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();

        if !name_contains.is_empty() {
            let pattern = name_contains.to_lowercase();
            if let Ok(devices) = host.input_devices() {
                for device in devices {
                    if let Ok(name) = device.name()
                        && name.to_lowercase().contains(&pattern)
                    {
                        return Ok(device);
                    }
                }
            }
            return Err(EchologError::DeviceNotFound {
                device: name_contains.to_string(),
            });
        }

        host.default_input_device()
            .ok_or_else(|| EchologError::DeviceNotFound {
                device: "default".to_string(),
            })
    })
}

/// Makes `cpal::Stream` transferable between threads.
///
/// SAFETY: the stream is only touched from the thread that owns the source;
/// the pipeline moves the whole source into its capture thread before
/// opening the stream.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

/// Capture settings for [`CpalAudioSource`].
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Substring matched against device names; empty selects the default.
    pub device_name_contains: String,
    pub sample_rate_hz: u32,
    pub channels: u16,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_name_contains: "Pettersson".to_string(),
            sample_rate_hz: crate::defaults::IN_SAMPLE_RATE,
            channels: 1,
        }
    }
}

/// CPAL-backed [`AudioSource`].
///
/// The stream callback appends samples to an internal buffer; `read` drains
/// it in pipeline-sized chunks, polling until enough frames arrived or the
/// timeout elapsed.
pub struct CpalAudioSource {
    config: CaptureConfig,
    stream: Option<SendableStream>,
    buffer: Arc<Mutex<Vec<i16>>>,
}

impl CpalAudioSource {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            stream: None,
            buffer: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn build_stream(&self, device: &cpal::Device) -> Result<cpal::Stream> {
        let stream_config = cpal::StreamConfig {
            channels: self.config.channels,
            sample_rate: cpal::SampleRate(self.config.sample_rate_hz),
            buffer_size: cpal::BufferSize::Default,
        };
        let error_callback = |e| tracing::error!(error = %e, "audio stream error");

        // Ultrasonic microphones deliver i16 natively; fall back to f32
        // conversion for devices that only expose float.
        let buffer = self.buffer.clone();
        let i16_stream = device.build_input_stream(
            &stream_config,
            move |data: &[i16], _| {
                buffer
                    .lock()
                    .expect("capture buffer poisoned")
                    .extend_from_slice(data);
            },
            error_callback,
            None,
        );
        match i16_stream {
            Ok(stream) => Ok(stream),
            Err(_) => {
                let buffer = self.buffer.clone();
                device
                    .build_input_stream(
                        &stream_config,
                        move |data: &[f32], _| {
                            let mut buffer =
                                buffer.lock().expect("capture buffer poisoned");
                            buffer.extend(
                                data.iter()
                                    .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16),
                            );
                        },
                        error_callback,
                        None,
                    )
                    .map_err(|e| EchologError::SourceOpen {
                        message: format!("Failed to build input stream: {}", e),
                    })
            }
        }
    }
}

impl AudioSource for CpalAudioSource {
    fn open(&mut self) -> Result<()> {
        let device = find_device(&self.config.device_name_contains)?;
        let name = device.name().unwrap_or_else(|_| "<unknown>".to_string());
        tracing::info!(
            device = %name,
            sample_rate = self.config.sample_rate_hz,
            "opening audio input"
        );

        let stream = self.build_stream(&device)?;
        stream.play().map_err(|e| EchologError::SourceOpen {
            message: format!("Failed to start input stream: {}", e),
        })?;
        self.stream = Some(SendableStream(stream));
        Ok(())
    }

    fn read(&mut self, frames: usize, timeout: Duration) -> Result<Vec<i16>> {
        if self.stream.is_none() {
            return Err(EchologError::SourceRead {
                message: "stream not open".to_string(),
            });
        }

        let wanted = frames * self.config.channels as usize;
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut buffer = self.buffer.lock().expect("capture buffer poisoned");
                if buffer.len() >= wanted {
                    return Ok(buffer.drain(..wanted).collect());
                }
            }
            if Instant::now() >= deadline {
                // Hand over whatever arrived; an empty read is a timeout,
                // not end of stream.
                let mut buffer = self.buffer.lock().expect("capture buffer poisoned");
                if buffer.is_empty() {
                    return Err(EchologError::SourceReadTimeout);
                }
                let len = buffer.len();
                return Ok(buffer.drain(..len).collect());
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn close(&mut self) {
        self.stream = None;
        self.buffer
            .lock()
            .expect("capture buffer poisoned")
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_before_open_is_an_error() {
        let mut source = CpalAudioSource::new(CaptureConfig::default());
        let result = source.read(16, Duration::from_millis(1));
        assert!(matches!(result, Err(EchologError::SourceRead { .. })));
    }

    #[test]
    fn capture_config_defaults() {
        let config = CaptureConfig::default();
        assert_eq!(config.sample_rate_hz, 384_000);
        assert_eq!(config.channels, 1);
        assert_eq!(config.device_name_contains, "Pettersson");
    }

    #[test]
    fn close_without_open_is_a_noop() {
        let mut source = CpalAudioSource::new(CaptureConfig::default());
        source.close();
    }
}
