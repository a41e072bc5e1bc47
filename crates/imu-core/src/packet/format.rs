//! Packet-format registry.
//!
//! One immutable [`PacketDescriptor`] per supported stream format. The only
//! runtime-variable property, the FM frame length, lives in a
//! [`PacketFormat`] value that callers thread through instead of mutating
//! the registry.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::{ENVELOPE_OVERHEAD, crc16, sum8};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Unknown packet type: {0}")]
    UnknownKind(String),
    #[error("{kind} frame length mismatch: expected {expected}, got {actual}")]
    LengthMismatch {
        kind: PacketKind,
        expected: usize,
        actual: usize,
    },
    #[error("{kind} frame does not start with its sync bytes")]
    SyncMismatch { kind: PacketKind },
    #[error("{kind} integrity mismatch: expected 0x{expected:04X}, got 0x{actual:04X}")]
    IntegrityMismatch {
        kind: PacketKind,
        expected: u16,
        actual: u16,
    },
    #[error("{kind} payload length mismatch: expected {expected}, got {actual}")]
    PayloadLength {
        kind: PacketKind,
        expected: usize,
        actual: usize,
    },
    #[error("Unsupported FM frame length {0}")]
    UnsupportedFmLength(usize),
}

/// Stream packet tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PacketKind {
    S1,
    S2,
    A1,
    A2,
    #[serde(rename = "FM")]
    Fm,
    S3,
    #[serde(rename = "AT")]
    At,
}

/// Trailer check carried by a format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Integrity {
    /// CRC-16, MSB first, over everything after the two preamble bytes.
    Crc16,
    /// 8-bit sum over everything after the first two sync bytes.
    Sum8,
    /// Accepted as-is.
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameLength {
    Fixed(usize),
    /// Learned from the device; the value is the fallback.
    Negotiated { default: usize },
}

impl FrameLength {
    pub fn default_len(&self) -> usize {
        match *self {
            FrameLength::Fixed(n) | FrameLength::Negotiated { default: n } => n,
        }
    }
}

/// Static description of one packet format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketDescriptor {
    pub kind: PacketKind,
    pub sync: &'static [u8],
    pub frame_length: FrameLength,
    pub integrity: Integrity,
    /// Bytes before the payload (sync + length byte where present).
    pub header_len: usize,
    /// Integrity trailer bytes.
    pub trailer_len: usize,
}

/// Offset where integrity coverage starts (after `55 55` / `55 AA`).
const INTEGRITY_START: usize = 2;

/// Size of one FM chip block: 7 little-endian i32 fields.
pub const FM_CHIP_BLOCK: usize = 28;
/// FM bytes outside the chip blocks with the two standard status fields.
pub const FM_FIXED_OVERHEAD: usize = ENVELOPE_OVERHEAD + 4;
pub const FM_MAX_CHIPS: usize = 4;

const S1: PacketDescriptor = PacketDescriptor {
    kind: PacketKind::S1,
    sync: &[0x55, 0x55, 0x53, 0x31],
    frame_length: FrameLength::Fixed(31),
    integrity: Integrity::Crc16,
    header_len: 5,
    trailer_len: 2,
};

const S2: PacketDescriptor = PacketDescriptor {
    kind: PacketKind::S2,
    sync: &[0x55, 0x55, 0x53, 0x32],
    frame_length: FrameLength::Fixed(45),
    integrity: Integrity::Crc16,
    header_len: 5,
    trailer_len: 2,
};

const A1: PacketDescriptor = PacketDescriptor {
    kind: PacketKind::A1,
    sync: &[0x55, 0x55, 0x41, 0x31],
    frame_length: FrameLength::Fixed(39),
    integrity: Integrity::Crc16,
    header_len: 5,
    trailer_len: 2,
};

const A2: PacketDescriptor = PacketDescriptor {
    kind: PacketKind::A2,
    sync: &[0x55, 0x55, 0x41, 0x32],
    frame_length: FrameLength::Fixed(37),
    integrity: Integrity::Crc16,
    header_len: 5,
    trailer_len: 2,
};

const FM: PacketDescriptor = PacketDescriptor {
    kind: PacketKind::Fm,
    sync: &[0x55, 0x55, 0x46, 0x4D],
    frame_length: FrameLength::Negotiated { default: 95 },
    integrity: Integrity::Crc16,
    header_len: 5,
    trailer_len: 2,
};

const S3: PacketDescriptor = PacketDescriptor {
    kind: PacketKind::S3,
    sync: &[0x55, 0xAA, 0x24],
    frame_length: FrameLength::Fixed(40),
    integrity: Integrity::Sum8,
    header_len: 3,
    trailer_len: 1,
};

const AT: PacketDescriptor = PacketDescriptor {
    kind: PacketKind::At,
    sync: &[0xBD, 0xDB, 0x54],
    frame_length: FrameLength::Fixed(39),
    integrity: Integrity::None,
    header_len: 3,
    trailer_len: 2,
};

impl PacketKind {
    pub const ALL: [PacketKind; 7] = [
        PacketKind::S1,
        PacketKind::S2,
        PacketKind::A1,
        PacketKind::A2,
        PacketKind::Fm,
        PacketKind::S3,
        PacketKind::At,
    ];

    pub fn descriptor(&self) -> &'static PacketDescriptor {
        match self {
            PacketKind::S1 => &S1,
            PacketKind::S2 => &S2,
            PacketKind::A1 => &A1,
            PacketKind::A2 => &A2,
            PacketKind::Fm => &FM,
            PacketKind::S3 => &S3,
            PacketKind::At => &AT,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PacketKind::S1 => "S1",
            PacketKind::S2 => "S2",
            PacketKind::A1 => "A1",
            PacketKind::A2 => "A2",
            PacketKind::Fm => "FM",
            PacketKind::S3 => "S3",
            PacketKind::At => "AT",
        }
    }

    /// Whether frames use the `55 55` envelope with a length byte.
    pub fn is_enveloped(&self) -> bool {
        self.descriptor().header_len == 5
    }
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PacketKind {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PacketKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| FrameError::UnknownKind(s.to_string()))
    }
}

/// FM frame shape derived from its negotiated length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FmLayout {
    pub chips: usize,
    /// 2, or 3 when the device appends the extra counter.
    pub status_fields: usize,
}

impl FmLayout {
    pub fn from_frame_len(frame_len: usize) -> Result<Self, FrameError> {
        let payload = frame_len
            .checked_sub(ENVELOPE_OVERHEAD)
            .ok_or(FrameError::UnsupportedFmLength(frame_len))?;
        let chips = frame_len.saturating_sub(FM_FIXED_OVERHEAD) / FM_CHIP_BLOCK;
        let status_fields = match payload.checked_sub(chips * FM_CHIP_BLOCK) {
            Some(4) => 2,
            Some(6) => 3,
            _ => return Err(FrameError::UnsupportedFmLength(frame_len)),
        };
        if !(1..=FM_MAX_CHIPS).contains(&chips) {
            return Err(FrameError::UnsupportedFmLength(frame_len));
        }
        Ok(Self {
            chips,
            status_fields,
        })
    }

    pub fn frame_len(&self) -> usize {
        ENVELOPE_OVERHEAD + self.chips * FM_CHIP_BLOCK + self.status_fields * 2
    }
}

/// A packet kind bound to its effective frame length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketFormat {
    kind: PacketKind,
    frame_len: usize,
}

impl PacketFormat {
    /// The registry default (FM: 3 chips, 2 status fields).
    pub fn new(kind: PacketKind) -> Self {
        Self {
            kind,
            frame_len: kind.descriptor().frame_length.default_len(),
        }
    }

    /// Bind `kind` to a length learned from the device.
    pub fn with_frame_len(kind: PacketKind, frame_len: usize) -> Result<Self, FrameError> {
        match kind.descriptor().frame_length {
            FrameLength::Fixed(expected) if expected != frame_len => {
                Err(FrameError::LengthMismatch {
                    kind,
                    expected,
                    actual: frame_len,
                })
            }
            FrameLength::Fixed(_) => Ok(Self { kind, frame_len }),
            FrameLength::Negotiated { .. } => {
                FmLayout::from_frame_len(frame_len)?;
                Ok(Self { kind, frame_len })
            }
        }
    }

    /// FM format for a chip subset.
    pub fn fm(chips: usize, extra_counter: bool) -> Result<Self, FrameError> {
        let layout = FmLayout {
            chips,
            status_fields: if extra_counter { 3 } else { 2 },
        };
        Self::with_frame_len(PacketKind::Fm, layout.frame_len())
    }

    pub fn kind(&self) -> PacketKind {
        self.kind
    }

    pub fn descriptor(&self) -> &'static PacketDescriptor {
        self.kind.descriptor()
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    pub fn sync(&self) -> &'static [u8] {
        self.descriptor().sync
    }

    /// FM chip layout; `None` for fixed formats.
    pub fn fm_layout(&self) -> Option<FmLayout> {
        match self.kind {
            PacketKind::Fm => FmLayout::from_frame_len(self.frame_len).ok(),
            _ => None,
        }
    }

    pub fn payload_len(&self) -> usize {
        let d = self.descriptor();
        self.frame_len - d.header_len - d.trailer_len
    }

    /// Payload slice of a validated frame.
    pub fn payload<'a>(&self, frame: &'a [u8]) -> &'a [u8] {
        let d = self.descriptor();
        &frame[d.header_len..frame.len() - d.trailer_len]
    }

    /// Check sync bytes, exact length and trailer of a candidate frame.
    pub fn validate(&self, frame: &[u8]) -> Result<(), FrameError> {
        let d = self.descriptor();
        if frame.len() != self.frame_len {
            return Err(FrameError::LengthMismatch {
                kind: self.kind,
                expected: self.frame_len,
                actual: frame.len(),
            });
        }
        if !frame.starts_with(d.sync) {
            return Err(FrameError::SyncMismatch { kind: self.kind });
        }
        let covered = &frame[INTEGRITY_START..frame.len() - d.trailer_len];
        let trailer = &frame[frame.len() - d.trailer_len..];
        let (expected, actual) = match d.integrity {
            Integrity::Crc16 => (crc16(covered), u16::from_be_bytes([trailer[0], trailer[1]])),
            Integrity::Sum8 => (sum8(covered) as u16, trailer[0] as u16),
            Integrity::None => return Ok(()),
        };
        if expected != actual {
            return Err(FrameError::IntegrityMismatch {
                kind: self.kind,
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Wrap `payload` into a complete frame with a correct trailer.
    ///
    /// Used by simulators and tests; the length byte of enveloped formats is
    /// the payload length.
    pub fn encode(&self, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
        if payload.len() != self.payload_len() {
            return Err(FrameError::PayloadLength {
                kind: self.kind,
                expected: self.payload_len(),
                actual: payload.len(),
            });
        }
        let d = self.descriptor();
        let mut frame = Vec::with_capacity(self.frame_len);
        frame.extend_from_slice(d.sync);
        if self.kind.is_enveloped() {
            frame.push(payload.len() as u8);
        }
        frame.extend_from_slice(payload);
        let covered = &frame[INTEGRITY_START..];
        match d.integrity {
            Integrity::Crc16 => {
                let crc = crc16(covered);
                frame.extend_from_slice(&crc.to_be_bytes());
            }
            Integrity::Sum8 => {
                let sum = sum8(covered);
                frame.push(sum);
            }
            Integrity::None => frame.extend(std::iter::repeat_n(0u8, d.trailer_len)),
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_table() {
        let expect = [
            (PacketKind::S1, 31, Integrity::Crc16),
            (PacketKind::S2, 45, Integrity::Crc16),
            (PacketKind::A1, 39, Integrity::Crc16),
            (PacketKind::A2, 37, Integrity::Crc16),
            (PacketKind::Fm, 95, Integrity::Crc16),
            (PacketKind::S3, 40, Integrity::Sum8),
            (PacketKind::At, 39, Integrity::None),
        ];
        for (kind, len, integrity) in expect {
            let d = kind.descriptor();
            assert_eq!(d.kind, kind);
            assert_eq!(d.frame_length.default_len(), len, "{kind}");
            assert_eq!(d.integrity, integrity, "{kind}");
        }
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("fm".parse::<PacketKind>().unwrap(), PacketKind::Fm);
        assert_eq!("S1".parse::<PacketKind>().unwrap(), PacketKind::S1);
        assert!("F1".parse::<PacketKind>().is_err());
    }

    #[test]
    fn test_fm_layout() {
        let layout = FmLayout::from_frame_len(95).unwrap();
        assert_eq!(layout, FmLayout { chips: 3, status_fields: 2 });
        let layout = FmLayout::from_frame_len(97).unwrap();
        assert_eq!(layout, FmLayout { chips: 3, status_fields: 3 });
        assert_eq!(FmLayout::from_frame_len(123).unwrap().chips, 4);
        assert_eq!(FmLayout::from_frame_len(39).unwrap().chips, 1);
        assert!(FmLayout::from_frame_len(96).is_err());
        assert!(FmLayout::from_frame_len(151).is_err());
        assert!(FmLayout::from_frame_len(3).is_err());
    }

    #[test]
    fn test_fixed_length_rejects_other_lengths() {
        assert!(PacketFormat::with_frame_len(PacketKind::S1, 31).is_ok());
        assert!(matches!(
            PacketFormat::with_frame_len(PacketKind::S1, 33),
            Err(FrameError::LengthMismatch { expected: 31, actual: 33, .. })
        ));
        assert_eq!(PacketFormat::fm(2, true).unwrap().frame_len(), 69);
    }

    #[test]
    fn test_encode_then_validate_each_integrity_kind() {
        for kind in [PacketKind::S1, PacketKind::S3, PacketKind::At] {
            let format = PacketFormat::new(kind);
            let frame = format.encode(&vec![0x11; format.payload_len()]).unwrap();
            assert_eq!(frame.len(), format.frame_len());
            assert!(format.validate(&frame).is_ok(), "{kind}");
        }
    }

    #[test]
    fn test_s3_sum_covers_tag_byte() {
        let format = PacketFormat::new(PacketKind::S3);
        let frame = format.encode(&[0u8; 36]).unwrap();
        assert_eq!(frame[39], 0x24);
    }

    #[test]
    fn test_corruption_detected() {
        let format = PacketFormat::new(PacketKind::S1);
        let mut frame = format.encode(&[0x42; 24]).unwrap();
        frame[10] ^= 0x01;
        assert!(matches!(
            format.validate(&frame),
            Err(FrameError::IntegrityMismatch { .. })
        ));
    }

    #[test]
    fn test_at_accepts_any_trailer() {
        let format = PacketFormat::new(PacketKind::At);
        let mut frame = format.encode(&[0x01; 34]).unwrap();
        frame[37] = 0xDE;
        frame[38] = 0xAD;
        assert!(format.validate(&frame).is_ok());
    }
}
