//! Byte channel to the device
//!
//! The scanner and the session never touch `serialport` directly; they talk to
//! a [`DeviceChannel`] obtained from a [`super::SerialBackend`]. That keeps the
//! protocol logic testable against in-memory devices.

use serialport::SerialPort;
use std::io::{self, Read, Write};

/// Abstraction for an open connection to the device
pub trait DeviceChannel: Read + Write + Send {
    /// Discard bytes received but not yet read
    fn clear_input_buffer(&mut self) -> io::Result<()>;

    /// Get number of bytes available to read without blocking
    fn bytes_to_read(&mut self) -> io::Result<u32>;

    /// Read everything currently buffered, without waiting for more
    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        let mut collected = Vec::new();
        let mut buffer = [0u8; 256];
        loop {
            let available = self.bytes_to_read()? as usize;
            if available == 0 {
                break;
            }
            let to_read = available.min(buffer.len());
            match self.read(&mut buffer[..to_read]) {
                Ok(0) => break,
                Ok(n) => collected.extend_from_slice(&buffer[..n]),
                Err(ref e)
                    if e.kind() == io::ErrorKind::TimedOut
                        || e.kind() == io::ErrorKind::WouldBlock =>
                {
                    break
                }
                Err(e) => return Err(e),
            }
        }
        Ok(collected)
    }
}

/// Serial port wrapper implementing DeviceChannel
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
}

impl SerialChannel {
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl Read for SerialChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl DeviceChannel for SerialChannel {
    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::other)
    }

    fn bytes_to_read(&mut self) -> io::Result<u32> {
        self.port.bytes_to_read().map_err(io::Error::other)
    }
}
