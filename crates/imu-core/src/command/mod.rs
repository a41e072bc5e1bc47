//! Command/response protocol.
//!
//! Commands are enveloped, written to the link and answered by a response
//! carrying the same code. The link must be in quiet mode (no streaming)
//! while commands run.

pub mod client;
pub mod control;
pub mod fields;
pub mod info;

use std::time::Duration;

use thiserror::Error;

use crate::protocol::{CommandCode, EnvelopeError};
use crate::transport::TransportError;

pub use client::{CommandClient, locate_response, response_header};
pub use control::LockRegion;
pub use fields::FieldValue;
pub use info::ProductInfo;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Envelope error: {0}")]
    Envelope(#[from] EnvelopeError),
    #[error("No response to {code} within {timeout:?}")]
    ResponseTimeout { code: CommandCode, timeout: Duration },
    #[error("Response CRC mismatch for {code}: expected 0x{expected:04X}, got 0x{actual:04X}")]
    CrcMismatch {
        code: CommandCode,
        expected: u16,
        actual: u16,
    },
    #[error("Malformed field response: {0}")]
    MalformedFieldResponse(String),
    #[error("Malformed {code} response: {reason}")]
    MalformedResponse { code: CommandCode, reason: String },
    #[error("Unexpected acknowledgement: expected {expected}, got {actual:02X?}")]
    UnexpectedAck {
        expected: CommandCode,
        actual: Vec<u8>,
    },
}
