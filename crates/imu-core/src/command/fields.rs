//! Configuration field access (GF/RF/SF/WF).
//!
//! Request payload is a count followed by big-endian field ids (reads) or
//! id/value pairs (writes). Read responses echo `count ++ (id, value)*`;
//! write responses echo `count ++ id*`.

use std::collections::BTreeMap;

use byteorder::{BigEndian, ByteOrder};
use tracing::{info, instrument};

use super::CommandError;
use super::client::CommandClient;
use crate::protocol::{
    CMD_GET_FIELDS, CMD_READ_FIELDS, CMD_SET_FIELDS, CMD_WRITE_FIELDS, CommandCode, Envelope,
    FIELD_PACKET_RATE,
};
use crate::transport::SerialTransport;

/// Value written to a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// Ordinary 16-bit register.
    Word(u16),
    /// Variable-width content, written as-is.
    Raw(Vec<u8>),
}

impl FieldValue {
    fn extend_into(&self, buf: &mut Vec<u8>) {
        match self {
            FieldValue::Word(w) => buf.extend_from_slice(&w.to_be_bytes()),
            FieldValue::Raw(bytes) => buf.extend_from_slice(bytes),
        }
    }
}

impl From<u16> for FieldValue {
    fn from(value: u16) -> Self {
        FieldValue::Word(value)
    }
}

fn count_byte(n: usize) -> Result<u8, CommandError> {
    u8::try_from(n)
        .map_err(|_| CommandError::MalformedFieldResponse(format!("{n} fields in one request")))
}

fn read_request(code: [u8; 2], ids: &[u16]) -> Result<Envelope, CommandError> {
    let mut payload = vec![count_byte(ids.len())?];
    for id in ids {
        payload.extend_from_slice(&id.to_be_bytes());
    }
    Ok(Envelope::new(code, payload)?)
}

fn write_request(code: [u8; 2], fields: &[(u16, FieldValue)]) -> Result<Envelope, CommandError> {
    let mut payload = vec![count_byte(fields.len())?];
    for (id, value) in fields {
        payload.extend_from_slice(&id.to_be_bytes());
        value.extend_into(&mut payload);
    }
    Ok(Envelope::new(code, payload)?)
}

/// Parse `count ++ (id, value)*` into a map of hex-encoded values.
fn parse_field_values(
    code: CommandCode,
    payload: &[u8],
) -> Result<BTreeMap<u16, String>, CommandError> {
    let (&count, pairs) = payload.split_first().ok_or_else(|| {
        CommandError::MalformedFieldResponse(format!("empty {code} response"))
    })?;
    if pairs.len() != count as usize * 4 {
        return Err(CommandError::MalformedFieldResponse(format!(
            "{code} response declares {count} fields but carries {} bytes",
            pairs.len()
        )));
    }
    Ok(pairs
        .chunks_exact(4)
        .map(|p| (BigEndian::read_u16(&p[..2]), format!("{:02X}{:02X}", p[2], p[3])))
        .collect())
}

impl<T: SerialTransport> CommandClient<T> {
    /// Current (RAM) values of `ids`.
    pub fn get_field_values(&mut self, ids: &[u16]) -> Result<BTreeMap<u16, String>, CommandError> {
        self.fetch_fields(CMD_GET_FIELDS, ids)
    }

    /// Stored (EEPROM) values of `ids`.
    pub fn read_field_values(&mut self, ids: &[u16]) -> Result<BTreeMap<u16, String>, CommandError> {
        self.fetch_fields(CMD_READ_FIELDS, ids)
    }

    /// Set fields until the next power cycle.
    pub fn write_fields_temporary(&mut self, fields: &[(u16, FieldValue)]) -> Result<(), CommandError> {
        self.store_fields(CMD_SET_FIELDS, fields)
    }

    /// Set fields persistently.
    pub fn write_fields_permanent(&mut self, fields: &[(u16, FieldValue)]) -> Result<(), CommandError> {
        self.store_fields(CMD_WRITE_FIELDS, fields)
    }

    #[instrument(skip(self))]
    fn fetch_fields(&mut self, code: [u8; 2], ids: &[u16]) -> Result<BTreeMap<u16, String>, CommandError> {
        let response = self.exchange(&read_request(code, ids)?)?;
        let mut values = parse_field_values(response.code, &response.payload)?;
        if values.len() != ids.len() {
            return Err(CommandError::MalformedFieldResponse(format!(
                "asked for {} fields, got {}",
                ids.len(),
                values.len()
            )));
        }
        if let (CMD_GET_FIELDS, Some(rate)) = (code, self.rate_setting()) {
            if let Some(value) = values.get_mut(&FIELD_PACKET_RATE) {
                *value = format!("00{rate:02X}");
            }
        }
        Ok(values)
    }

    #[instrument(skip(self, fields), fields(count = fields.len()))]
    fn store_fields(&mut self, code: [u8; 2], fields: &[(u16, FieldValue)]) -> Result<(), CommandError> {
        let response = self.exchange(&write_request(code, fields)?)?;
        let expected = 1 + 2 * fields.len();
        if response.payload.len() != expected {
            return Err(CommandError::MalformedFieldResponse(format!(
                "{} response carries {} bytes, expected {expected}",
                response.code,
                response.payload.len()
            )));
        }
        info!(code = %response.code, count = fields.len(), "Fields written");
        Ok(())
    }
}
