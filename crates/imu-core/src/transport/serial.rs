//! serialport-based transport implementation.

use std::io::{ErrorKind, Read, Write};

use serialport::{ClearBuffer, DataBits, Parity, SerialPort, StopBits};
use tracing::{debug, info, instrument};

use super::traits::{SerialTransport, TransportError};
use crate::protocol::SERIAL_READ_TIMEOUT;

/// Native serial port (8N1, short read timeout).
pub struct SerialPortTransport {
    inner: Box<dyn SerialPort>,
    port: String,
    baud: u32,
}

impl SerialPortTransport {
    /// Open `port` at `baud`.
    #[instrument(level = "info")]
    pub fn open(port: &str, baud: u32) -> Result<Self, TransportError> {
        let inner = serialport::new(port, baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(SERIAL_READ_TIMEOUT)
            .open()
            .map_err(|e| TransportError::OpenFailed {
                port: port.to_string(),
                baud,
                message: e.to_string(),
            })?;

        info!(port = %port, baud, "Serial port opened");
        Ok(Self {
            inner,
            port: port.to_string(),
            baud,
        })
    }
}

impl SerialTransport for SerialPortTransport {
    #[instrument(skip(self, data), fields(len = data.len()))]
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        self.inner
            .write_all(data)
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
        self.inner
            .flush()
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
        debug!(bytes_written = data.len(), "Write complete");
        Ok(data.len())
    }

    fn read(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; max_len];
        match self.inner.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) if e.kind() == ErrorKind::BrokenPipe => Err(TransportError::Disconnected),
            Err(e) => Err(TransportError::ReadFailed(e.to_string())),
        }
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        self.inner
            .clear(ClearBuffer::Input)
            .map_err(|e| TransportError::ReadFailed(e.to_string()))
    }

    fn clear_output(&mut self) -> Result<(), TransportError> {
        self.inner
            .clear(ClearBuffer::Output)
            .map_err(|e| TransportError::WriteFailed(e.to_string()))
    }

    #[instrument(skip(self))]
    fn set_baud_rate(&mut self, baud: u32) -> Result<(), TransportError> {
        if baud == self.baud {
            return Ok(());
        }
        self.inner
            .set_baud_rate(baud)
            .map_err(|e| TransportError::BaudChangeFailed {
                baud,
                message: e.to_string(),
            })?;
        debug!(from = self.baud, to = baud, "Baud rate changed");
        self.baud = baud;
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.baud
    }

    fn port_name(&self) -> &str {
        &self.port
    }
}
