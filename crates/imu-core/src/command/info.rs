//! Product identification (GP "ID").

use std::fmt;

use byteorder::{BigEndian, ByteOrder};
use tracing::{info, instrument};

use super::CommandError;
use super::client::CommandClient;
use crate::protocol::{CMD_GET_PACKET, Envelope, PACKET_ID};
use crate::transport::SerialTransport;

/// Identity reported by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductInfo {
    pub serial_number: u32,
    /// Model and version text, e.g. `"IMU330BA 5020-3021-01 v1.0"`.
    pub model: String,
}

impl ProductInfo {
    /// Parse an `ID` packet payload: 4-byte big-endian serial number
    /// followed by ASCII text, optionally NUL-terminated.
    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        if payload.len() < 4 {
            return None;
        }
        let serial_number = BigEndian::read_u32(&payload[..4]);
        let text = &payload[4..];
        let end = text.iter().position(|&b| b == 0).unwrap_or(text.len());
        let model = String::from_utf8_lossy(&text[..end]).trim().to_string();
        Some(Self {
            serial_number,
            model,
        })
    }

    /// The bootloader identifies itself with "load" in its model string.
    pub fn is_bootloader(&self) -> bool {
        self.model.contains("load")
    }
}

impl fmt::Display for ProductInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.serial_number, self.model)
    }
}

impl<T: SerialTransport> CommandClient<T> {
    #[instrument(skip(self))]
    pub fn get_product_info(&mut self) -> Result<ProductInfo, CommandError> {
        let request = Envelope::new(CMD_GET_PACKET, PACKET_ID.to_vec())?;
        let response = self.exchange(&request)?;
        let product = ProductInfo::from_payload(&response.payload).ok_or_else(|| {
            CommandError::MalformedResponse {
                code: response.code,
                reason: format!("{} byte payload", response.payload.len()),
            }
        })?;
        info!(serial = product.serial_number, model = %product.model, "Product info");
        Ok(product)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::client::tests::{client, reply};
    use crate::transport::MockTransport;

    fn id_payload(sn: u32, text: &str) -> Vec<u8> {
        let mut payload = sn.to_be_bytes().to_vec();
        payload.extend_from_slice(text.as_bytes());
        payload
    }

    #[test]
    fn test_parse_id_payload() {
        let mut payload = id_payload(1_808_400_123, "IMU330BA 5020-3021-01");
        payload.extend_from_slice(&[0, 0xFF]);
        let info = ProductInfo::from_payload(&payload).unwrap();
        assert_eq!(info.serial_number, 1_808_400_123);
        assert_eq!(info.model, "IMU330BA 5020-3021-01");
        assert!(!info.is_bootloader());
        assert_eq!(info.to_string(), "1808400123 IMU330BA 5020-3021-01");
        assert!(ProductInfo::from_payload(&[1, 2]).is_none());
    }

    #[test]
    fn test_get_product_info_correlates_id_response() {
        let mock = MockTransport::new();
        mock.queue_reply(&reply(PACKET_ID, &id_payload(42, "IMU330 bootloader")));

        let info = client(&mock).get_product_info().unwrap();
        assert_eq!(info.serial_number, 42);
        assert!(info.is_bootloader());
        assert_eq!(
            mock.get_writes()[0][..7],
            [0x55, 0x55, b'G', b'P', 0x02, b'I', b'D']
        );
    }
}
