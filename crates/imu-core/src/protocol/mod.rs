//! Protocol module - wire-level definitions shared by every layer.

pub mod code;
pub mod constants;
pub mod crc;
pub mod envelope;

pub use code::CommandCode;
pub use constants::*;
pub use crc::{crc16, crc16_bytes, sum8};
pub use envelope::{Envelope, EnvelopeError};
