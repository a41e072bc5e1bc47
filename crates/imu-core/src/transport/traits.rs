//! Serial transport abstraction.
//!
//! Defines the `SerialTransport` trait the protocol layers talk through,
//! allowing different implementations (serialport, mock, observers).

use std::time::{Duration, Instant};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to open {port} at {baud} baud: {message}")]
    OpenFailed {
        port: String,
        baud: u32,
        message: String,
    },

    #[error("Failed to switch to {baud} baud: {message}")]
    BaudChangeFailed { baud: u32, message: String },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Duplex byte link to the device (8 data bits, no parity, 1 stop bit).
pub trait SerialTransport: Send {
    /// Write all of `data`.
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Read whatever is available, up to `max_len` bytes.
    ///
    /// Returns an empty vector when nothing arrives within the port's short
    /// read timeout.
    fn read(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError>;

    /// Discard unread input.
    fn clear_input(&mut self) -> Result<(), TransportError>;

    /// Discard unsent output.
    fn clear_output(&mut self) -> Result<(), TransportError>;

    /// Change the link speed without reopening.
    fn set_baud_rate(&mut self, baud: u32) -> Result<(), TransportError>;

    fn baud_rate(&self) -> u32;

    fn port_name(&self) -> &str;

    /// Poll until `len` bytes have been read or `timeout` elapses.
    ///
    /// Always reads at least once; may return fewer than `len` bytes.
    fn read_exact_within(
        &mut self,
        len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let start = Instant::now();
        let mut buf = Vec::with_capacity(len);
        loop {
            let chunk = self.read(len - buf.len())?;
            buf.extend_from_slice(&chunk);
            if buf.len() >= len || start.elapsed() >= timeout {
                return Ok(buf);
            }
            if chunk.is_empty() {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }
}

impl<T: SerialTransport + ?Sized> SerialTransport for Box<T> {
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        (**self).write(data)
    }

    fn read(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        (**self).read(max_len)
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        (**self).clear_input()
    }

    fn clear_output(&mut self) -> Result<(), TransportError> {
        (**self).clear_output()
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<(), TransportError> {
        (**self).set_baud_rate(baud)
    }

    fn baud_rate(&self) -> u32 {
        (**self).baud_rate()
    }

    fn port_name(&self) -> &str {
        (**self).port_name()
    }
}
