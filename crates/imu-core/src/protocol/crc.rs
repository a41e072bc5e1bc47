//! Integrity-check primitives.
//!
//! The envelope CRC is CRC-16 with polynomial 0x1021, initial register
//! 0x1D0F, no reflection and no final XOR (catalogued as CRC-16/SPI-FUJITSU,
//! a.k.a. AUG-CCITT). The S3 stream packets use a plain 8-bit sum instead.

use crc::{CRC_16_SPI_FUJITSU, Crc};

pub const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_SPI_FUJITSU);

/// CRC-16 over `bytes`.
pub fn crc16(bytes: &[u8]) -> u16 {
    CRC16.checksum(bytes)
}

/// CRC-16 as it appears on the wire (MSB first).
pub fn crc16_bytes(bytes: &[u8]) -> [u8; 2] {
    crc16(bytes).to_be_bytes()
}

/// Sum of all bytes modulo 256.
pub fn sum8(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Bit-by-bit reference of the register update.
    fn crc16_reference(bytes: &[u8]) -> u16 {
        let mut crc: u32 = 0x1D0F;
        for &b in bytes {
            crc ^= (b as u32) << 8;
            for _ in 0..8 {
                crc = if crc & 0x8000 != 0 {
                    (crc << 1) ^ 0x1021
                } else {
                    crc << 1
                };
            }
        }
        (crc & 0xFFFF) as u16
    }

    #[test]
    fn test_crc16_check_value() {
        assert_eq!(crc16(b"123456789"), 0xE5CC);
    }

    #[test]
    fn test_crc16_matches_reference() {
        let samples: [&[u8]; 4] = [b"", b"JI\x00", b"SF\x05\x01\x00\x01\x00\x00", &[0xFF; 64]];
        for s in samples {
            assert_eq!(crc16(s), crc16_reference(s), "input {:02X?}", s);
        }
        assert_eq!(crc16(b""), 0x1D0F);
    }

    #[test]
    fn test_crc16_bytes_msb_first() {
        let v = crc16(b"GP\x02ID");
        assert_eq!(crc16_bytes(b"GP\x02ID"), [(v >> 8) as u8, v as u8]);
    }

    #[test]
    fn test_sum8_wraps() {
        assert_eq!(sum8(&[]), 0);
        assert_eq!(sum8(&[0x01, 0x02, 0x03]), 6);
        assert_eq!(sum8(&[0xFF, 0x02]), 0x01);
    }
}
