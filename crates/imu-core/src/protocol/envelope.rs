//! Command/response envelope.
//!
//! ```text
//! 55 55 | code (2) | length (1) | payload (length) | crc16 (2, MSB first)
//! ```
//!
//! The CRC covers `code ++ length ++ payload`.

use thiserror::Error;

use super::code::CommandCode;
use super::constants::{ENVELOPE_HEADER_LEN, ENVELOPE_OVERHEAD, PREAMBLE};
use super::crc::crc16;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("Buffer too small: expected {expected}, got {actual}")]
    BufferTooSmall { expected: usize, actual: usize },
    #[error("Missing preamble: got {0:02X?}")]
    MissingPreamble([u8; 2]),
    #[error("Payload too long: {0} bytes (max 255)")]
    PayloadTooLong(usize),
    #[error("CRC mismatch: expected 0x{expected:04X}, got 0x{actual:04X}")]
    CrcMismatch { expected: u16, actual: u16 },
}

/// One framed command or response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub code: CommandCode,
    pub payload: Vec<u8>,
    /// CRC as carried on the wire (computed for outgoing envelopes).
    pub crc: u16,
}

impl Envelope {
    /// Build an outgoing envelope, computing its CRC.
    pub fn new(code: impl Into<CommandCode>, payload: Vec<u8>) -> Result<Self, EnvelopeError> {
        if payload.len() > u8::MAX as usize {
            return Err(EnvelopeError::PayloadTooLong(payload.len()));
        }
        let code = code.into();
        let crc = Self::compute_crc(code, &payload);
        Ok(Self { code, payload, crc })
    }

    /// Zero-payload command.
    pub fn empty(code: impl Into<CommandCode>) -> Self {
        let code = code.into();
        Self {
            code,
            payload: Vec::new(),
            crc: Self::compute_crc(code, &[]),
        }
    }

    fn compute_crc(code: CommandCode, payload: &[u8]) -> u16 {
        let mut covered = Vec::with_capacity(3 + payload.len());
        covered.extend_from_slice(&code.bytes());
        covered.push(payload.len() as u8);
        covered.extend_from_slice(payload);
        crc16(&covered)
    }

    /// Total wire size.
    pub fn wire_len(&self) -> usize {
        self.payload.len() + ENVELOPE_OVERHEAD
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.wire_len());
        buf.extend_from_slice(&PREAMBLE);
        buf.extend_from_slice(&self.code.bytes());
        buf.push(self.payload.len() as u8);
        buf.extend_from_slice(&self.payload);
        buf.extend_from_slice(&self.crc.to_be_bytes());
        buf
    }

    /// Parse an envelope from the start of `data`.
    ///
    /// The trailing CRC is recorded but not checked; see [`Envelope::verify`].
    pub fn from_bytes(data: &[u8]) -> Result<Self, EnvelopeError> {
        if data.len() < ENVELOPE_OVERHEAD {
            return Err(EnvelopeError::BufferTooSmall {
                expected: ENVELOPE_OVERHEAD,
                actual: data.len(),
            });
        }
        if data[..2] != PREAMBLE {
            return Err(EnvelopeError::MissingPreamble([data[0], data[1]]));
        }
        let len = data[4] as usize;
        let total = len + ENVELOPE_OVERHEAD;
        if data.len() < total {
            return Err(EnvelopeError::BufferTooSmall {
                expected: total,
                actual: data.len(),
            });
        }
        let payload = data[ENVELOPE_HEADER_LEN..ENVELOPE_HEADER_LEN + len].to_vec();
        let crc = u16::from_be_bytes([data[total - 2], data[total - 1]]);
        Ok(Self {
            code: CommandCode::new([data[2], data[3]]),
            payload,
            crc,
        })
    }

    /// Check the carried CRC against the content.
    pub fn verify(&self) -> Result<(), EnvelopeError> {
        let expected = Self::compute_crc(self.code, &self.payload);
        if expected != self.crc {
            return Err(EnvelopeError::CrcMismatch {
                expected,
                actual: self.crc,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::*;
    use crate::protocol::crc::crc16_bytes;

    #[test]
    fn test_empty_command_layout() {
        let bytes = Envelope::empty(CMD_JUMP_BOOTLOADER).to_bytes();
        let crc = crc16_bytes(&[b'J', b'I', 0x00]);
        assert_eq!(bytes, vec![0x55, 0x55, b'J', b'I', 0x00, crc[0], crc[1]]);
    }

    #[test]
    fn test_quiet_command_layout() {
        let env = Envelope::new(CMD_SET_FIELDS, QUIET_PAYLOAD.to_vec()).unwrap();
        let bytes = env.to_bytes();
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[..10], &[0x55, 0x55, b'S', b'F', 0x05, 0x01, 0x00, 0x01, 0x00, 0x00]);
        assert_eq!(&bytes[10..], &crc16_bytes(&bytes[2..10]));
    }

    #[test]
    fn test_parse_and_verify() {
        let env = Envelope::new(CMD_GET_PACKET, PACKET_ID.to_vec()).unwrap();
        let mut bytes = env.to_bytes();
        bytes.extend_from_slice(b"trailing");
        let parsed = Envelope::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, env);
        assert!(parsed.verify().is_ok());
    }

    #[test]
    fn test_corrupt_crc_detected() {
        let mut bytes = Envelope::empty(CMD_JUMP_APP).to_bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let parsed = Envelope::from_bytes(&bytes).unwrap();
        assert!(matches!(parsed.verify(), Err(EnvelopeError::CrcMismatch { .. })));
    }

    #[test]
    fn test_truncated() {
        let bytes = Envelope::new(CMD_SET_FIELDS, vec![1, 2, 3]).unwrap().to_bytes();
        assert!(matches!(
            Envelope::from_bytes(&bytes[..8]),
            Err(EnvelopeError::BufferTooSmall { expected: 10, actual: 8 })
        ));
    }

    #[test]
    fn test_payload_limit() {
        assert!(matches!(
            Envelope::new(CMD_WRITE_APP, vec![0; 256]),
            Err(EnvelopeError::PayloadTooLong(256))
        ));
    }
}
