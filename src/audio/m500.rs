//! Pettersson M500 USB ultrasound microphone.
//!
//! The M500 is driven over raw USB bulk transfer with fixed-layout command
//! packets rather than the standard audio class. This module owns the
//! packet codec and the [`AudioSource`] adapter; the actual USB plumbing is
//! injected through [`UsbTransport`] so the protocol stays testable and the
//! crate carries no USB stack.

use crate::audio::source::AudioSource;
use crate::error::{EchologError, Result};
use std::time::Duration;

/// ASCII signature opening every command packet.
const SIGNATURE: &[u8; 6] = b"BatMic";

/// Total command packet length in bytes.
pub const COMMAND_PACKET_LEN: usize = 32;

/// Bulk read size in bytes. Must be a power of two per the device docs.
const STREAM_READ_BYTES: usize = 0x20000;

/// Command codes understood by the microphone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum M500Command {
    StartStream = 0x01,
    LedFlash = 0x02,
    LedOn = 0x03,
    StopStream = 0x04,
}

/// Builds one 32-byte command packet.
///
/// Layout: 6-byte `"BatMic"` signature, 1-byte command code, little-endian
/// u32 sample rate, little-endian u32 buffer size, 4 filter bytes, stereo
/// flag, trigger flag, infinite flag (set for the LED commands), 10 fill
/// bytes.
pub fn command_packet(
    command: M500Command,
    sample_rate_hz: u32,
    buffer_size: u32,
) -> [u8; COMMAND_PACKET_LEN] {
    let mut packet = [0u8; COMMAND_PACKET_LEN];
    packet[0..6].copy_from_slice(SIGNATURE);
    packet[6] = command as u8;
    packet[7..11].copy_from_slice(&sample_rate_hz.to_le_bytes());
    packet[11..15].copy_from_slice(&buffer_size.to_le_bytes());
    // packet[15..19]: filter, off.
    // packet[19]: stereo, off. packet[20]: trigger, off.
    packet[21] = match command {
        M500Command::LedFlash | M500Command::LedOn => 0xff,
        _ => 0x00,
    };
    // packet[22..32]: fill.
    packet
}

/// Raw USB bulk transfer to the microphone. Implemented outside this crate
/// (libusb, kernel interface); timeouts bound every transfer, and transfer
/// failures surface as [`EchologError::Usb`].
pub trait UsbTransport: Send {
    /// Writes a command packet to the OUT endpoint.
    fn write_bulk(&mut self, data: &[u8], timeout: Duration) -> Result<()>;

    /// Reads up to `size` bytes from the IN (stream) endpoint. An empty
    /// result means the device stopped streaming.
    fn read_bulk(&mut self, size: usize, timeout: Duration) -> Result<Vec<u8>>;
}

/// Control interface for the M500.
pub struct M500BatMic<T: UsbTransport> {
    transport: T,
    sample_rate_hz: u32,
    buffer_size: u32,
}

impl<T: UsbTransport> M500BatMic<T> {
    pub fn new(transport: T, sample_rate_hz: u32) -> Self {
        Self {
            transport,
            sample_rate_hz,
            buffer_size: 0x4000,
        }
    }

    fn send_command(&mut self, command: M500Command) -> Result<()> {
        let packet = command_packet(command, self.sample_rate_hz, self.buffer_size);
        self.transport
            .write_bulk(&packet, Duration::from_secs(1))
    }

    pub fn start_stream(&mut self) -> Result<()> {
        self.send_command(M500Command::StartStream)
    }

    pub fn stop_stream(&mut self) -> Result<()> {
        self.send_command(M500Command::StopStream)
    }

    pub fn led_on(&mut self) -> Result<()> {
        self.send_command(M500Command::LedOn)
    }

    pub fn led_flash(&mut self) -> Result<()> {
        self.send_command(M500Command::LedFlash)
    }

    /// One bulk read from the stream endpoint.
    pub fn read_stream(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        self.transport.read_bulk(STREAM_READ_BYTES, timeout)
    }
}

/// [`AudioSource`] adapter: start the stream and light the LED on open,
/// decode little-endian 16-bit frames on read, stop the stream on close.
pub struct M500Source<T: UsbTransport> {
    mic: M500BatMic<T>,
    streaming: bool,
}

impl<T: UsbTransport> M500Source<T> {
    pub fn new(transport: T, sample_rate_hz: u32) -> Self {
        Self {
            mic: M500BatMic::new(transport, sample_rate_hz),
            streaming: false,
        }
    }
}

impl<T: UsbTransport> AudioSource for M500Source<T> {
    fn open(&mut self) -> Result<()> {
        self.mic
            .start_stream()
            .map_err(|e| EchologError::SourceOpen {
                message: e.to_string(),
            })?;
        // Steady LED tells the field operator the microphone is live.
        if let Err(e) = self.mic.led_on() {
            tracing::warn!(error = %e, "failed to switch on M500 LED");
        }
        self.streaming = true;
        Ok(())
    }

    fn read(&mut self, _frames: usize, timeout: Duration) -> Result<Vec<i16>> {
        let bytes = self.mic.read_stream(timeout)?;
        if bytes.is_empty() {
            return Ok(Vec::new());
        }
        Ok(bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect())
    }

    fn close(&mut self) {
        if self.streaming {
            if let Err(e) = self.mic.stop_stream() {
                tracing::error!(error = %e, "failed to stop M500 stream");
            }
            self.streaming = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn start_packet_matches_device_protocol() {
        // Known-good packet for 500 kHz / 16384-byte buffers.
        let packet = command_packet(M500Command::StartStream, 500_000, 0x4000);
        let mut expected = Vec::new();
        expected.extend_from_slice(b"BatMic");
        expected.push(0x01);
        expected.extend_from_slice(&[0x20, 0xa1, 0x07, 0x00]); // 500000 LE
        expected.extend_from_slice(&[0x00, 0x40, 0x00, 0x00]); // 0x4000 LE
        expected.extend_from_slice(&[0x00; 4]); // filter
        expected.push(0x00); // stereo
        expected.push(0x00); // trig
        expected.push(0x00); // infinite
        expected.extend_from_slice(&[0x00; 10]); // fill
        assert_eq!(packet.as_slice(), expected.as_slice());
        assert_eq!(packet.len(), COMMAND_PACKET_LEN);
    }

    #[test]
    fn led_commands_set_the_infinite_flag() {
        let on = command_packet(M500Command::LedOn, 500_000, 0x4000);
        let flash = command_packet(M500Command::LedFlash, 500_000, 0x4000);
        let stop = command_packet(M500Command::StopStream, 500_000, 0x4000);
        assert_eq!(on[6], 0x03);
        assert_eq!(on[21], 0xff);
        assert_eq!(flash[6], 0x02);
        assert_eq!(flash[21], 0xff);
        assert_eq!(stop[6], 0x04);
        assert_eq!(stop[21], 0x00);
    }

    /// Transport that records writes and serves scripted reads.
    #[derive(Clone, Default)]
    struct MockTransport {
        writes: Arc<Mutex<Vec<Vec<u8>>>>,
        reads: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl UsbTransport for MockTransport {
        fn write_bulk(&mut self, data: &[u8], _timeout: Duration) -> Result<()> {
            self.writes.lock().unwrap().push(data.to_vec());
            Ok(())
        }

        fn read_bulk(&mut self, _size: usize, _timeout: Duration) -> Result<Vec<u8>> {
            let mut reads = self.reads.lock().unwrap();
            if reads.is_empty() {
                Ok(Vec::new())
            } else {
                Ok(reads.remove(0))
            }
        }
    }

    #[test]
    fn source_open_starts_stream_and_led() {
        let transport = MockTransport::default();
        let writes = transport.writes.clone();
        let mut source = M500Source::new(transport, 500_000);

        source.open().unwrap();
        let written = writes.lock().unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(written[0][6], 0x01); // start stream
        assert_eq!(written[1][6], 0x03); // LED on
    }

    #[test]
    fn source_read_decodes_little_endian_frames() {
        let transport = MockTransport::default();
        transport
            .reads
            .lock()
            .unwrap()
            .push(vec![0x01, 0x00, 0xff, 0xff, 0x00, 0x80]);
        let mut source = M500Source::new(transport, 500_000);

        source.open().unwrap();
        let samples = source
            .read(3, Duration::from_secs(2))
            .unwrap();
        assert_eq!(samples, vec![1, -1, i16::MIN]);
    }

    #[test]
    fn source_close_stops_stream() {
        let transport = MockTransport::default();
        let writes = transport.writes.clone();
        let mut source = M500Source::new(transport, 500_000);

        source.open().unwrap();
        source.close();
        let written = writes.lock().unwrap();
        assert_eq!(written.last().unwrap()[6], 0x04); // stop stream
    }
}
