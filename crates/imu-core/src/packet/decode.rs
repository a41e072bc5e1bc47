//! Physical-unit decoders.
//!
//! Dispatch is a `match` on [`PacketKind`]; each decoder unpacks the payload
//! in its format's byte order and applies fixed scale factors.

use std::io::Cursor;

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};

use super::format::{FrameError, PacketFormat, PacketKind};

const ACCEL_SCALE: f64 = 20.0 / 65536.0;
const RATE_SCALE: f64 = 1260.0 / 65536.0;
const ANGLE_SCALE: f64 = 360.0 / 65536.0;
const TEMP_SCALE: f64 = 200.0 / 65536.0;
const MAG_SCALE: f64 = 2.0 / 65536.0;
const S1_TIMER_SCALE: f64 = 15.259022;

const AT_RATE_SCALE: f64 = 300.0 / 32768.0;
const AT_ACCEL_SCALE: f64 = 12.0 / 32768.0;
const AT_TEMP_SCALE: f64 = 200.0 / 32768.0;
const AT_TOW_SCALE: f64 = 1e-3;

const S3_COUNT_SCALE: f64 = 0.000001;
const S3_ACCEL_EXTRA: f64 = 0.1;
const S3_TEMP_SCALE: f64 = 0.008;

/// One named engineering-unit value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Field {
    pub name: &'static str,
    pub value: f64,
}

/// Ordered, named field values decoded from one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSample {
    pub kind: PacketKind,
    /// FM only: number of chip blocks.
    pub chips: Option<usize>,
    pub fields: Vec<Field>,
}

impl DecodedSample {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.fields.iter().find(|f| f.name == name).map(|f| f.value)
    }

    pub fn values(&self) -> Vec<f64> {
        self.fields.iter().map(|f| f.value).collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

const S1_FIELDS: [&str; 12] = [
    "xAccel", "yAccel", "zAccel", "xRate", "yRate", "zRate", "xRateTemp", "yRateTemp",
    "zRateTemp", "boardTemp", "timer", "BITstatus",
];

const S2_FIELDS: [&str; 10] = [
    "gps_week", "gps_time_of_week", "x_accel", "y_accel", "z_accel", "x_gyro", "y_gyro",
    "z_gyro", "temp", "master_bit",
];

const A1_FIELDS: [&str; 15] = [
    "rollAngle", "pitchAngle", "yawAngleMag", "xRateCorrected", "yRateCorrected",
    "zRateCorrected", "xAccel", "yAccel", "zAccel", "xMag", "yMag", "zMag", "xRateTemp",
    "timeITOW", "BITstatus",
];

const A2_FIELDS: [&str; 14] = [
    "rollAngle", "pitchAngle", "yawAngleTrue", "xRateCorrected", "yRateCorrected",
    "zRateCorrected", "xAccel", "yAccel", "zAccel", "xRateTemp", "yRateTemp", "zRateTemp",
    "timeITOW", "BITstatus",
];

const FM_CHIP_FIELDS: [[&str; 7]; 4] = [
    ["xAccelCounts1", "yAccelCounts1", "zAccelCounts1", "xRateCounts1", "yRateCounts1", "zRateCounts1", "TempCounts1"],
    ["xAccelCounts2", "yAccelCounts2", "zAccelCounts2", "xRateCounts2", "yRateCounts2", "zRateCounts2", "TempCounts2"],
    ["xAccelCounts3", "yAccelCounts3", "zAccelCounts3", "xRateCounts3", "yRateCounts3", "zRateCounts3", "TempCounts3"],
    ["xAccelCounts4", "yAccelCounts4", "zAccelCounts4", "xRateCounts4", "yRateCounts4", "zRateCounts4", "TempCounts4"],
];

const FM_STATUS_FIELDS: [&str; 3] = ["sensorSubset", "sampleIdx", "extraCounter"];

const S3_FIELDS: [&str; 10] = [
    "num", "xRate", "yRate", "zRate", "xAccel", "yAccel", "zAccel", "boardTemp",
    "supplierid", "productid",
];

const AT_FIELDS: [&str; 20] = [
    "xRate", "yRate", "zRate", "xAccel", "yAccel", "zAccel", "Temp", "FixedValue", "Flags0",
    "Flags1", "FrameCount", "GpsWeek", "TimeOfWeek", "year", "month", "day", "hour", "minute",
    "second", "milliseconds",
];

/// Field names `kind` decodes to, in order (FM: for `chips` blocks).
pub fn field_names(format: &PacketFormat) -> Vec<&'static str> {
    match format.kind() {
        PacketKind::S1 => S1_FIELDS.to_vec(),
        PacketKind::S2 => S2_FIELDS.to_vec(),
        PacketKind::A1 => A1_FIELDS.to_vec(),
        PacketKind::A2 => A2_FIELDS.to_vec(),
        PacketKind::S3 => S3_FIELDS.to_vec(),
        PacketKind::At => AT_FIELDS.to_vec(),
        PacketKind::Fm => match format.fm_layout() {
            Some(layout) => FM_CHIP_FIELDS[..layout.chips]
                .iter()
                .flatten()
                .chain(&FM_STATUS_FIELDS[..layout.status_fields])
                .copied()
                .collect(),
            None => Vec::new(),
        },
    }
}

/// Decode the payload of a validated frame.
pub fn decode_payload(format: &PacketFormat, payload: &[u8]) -> Result<DecodedSample, FrameError> {
    if payload.len() != format.payload_len() {
        return Err(FrameError::PayloadLength {
            kind: format.kind(),
            expected: format.payload_len(),
            actual: payload.len(),
        });
    }
    let mut cur = Cursor::new(payload);
    let values = match format.kind() {
        PacketKind::S1 => decode_s1(&mut cur),
        PacketKind::S2 => decode_s2(&mut cur),
        PacketKind::A1 => decode_a1::<BigEndian>(&mut cur),
        PacketKind::A2 => decode_a2::<BigEndian>(&mut cur),
        PacketKind::Fm => {
            let layout = format
                .fm_layout()
                .ok_or(FrameError::UnsupportedFmLength(format.frame_len()))?;
            decode_fm(&mut cur, layout.chips, layout.status_fields)
        }
        PacketKind::S3 => decode_s3(&mut cur),
        PacketKind::At => decode_at(&mut cur),
    }
    .map_err(|_| FrameError::PayloadLength {
        kind: format.kind(),
        expected: format.payload_len(),
        actual: payload.len(),
    })?;

    let fields = field_names(format)
        .into_iter()
        .zip(values)
        .map(|(name, value)| Field { name, value })
        .collect();
    Ok(DecodedSample {
        kind: format.kind(),
        chips: format.fm_layout().map(|l| l.chips),
        fields,
    })
}

/// Validate a whole frame and decode it.
pub fn decode_frame(format: &PacketFormat, frame: &[u8]) -> Result<DecodedSample, FrameError> {
    format.validate(frame)?;
    decode_payload(format, format.payload(frame))
}

type Values = std::io::Result<Vec<f64>>;

fn decode_s1(cur: &mut Cursor<&[u8]>) -> Values {
    let mut v = Vec::with_capacity(S1_FIELDS.len());
    for _ in 0..3 {
        v.push(cur.read_i16::<BigEndian>()? as f64 * ACCEL_SCALE);
    }
    for _ in 0..3 {
        v.push(cur.read_i16::<BigEndian>()? as f64 * RATE_SCALE);
    }
    for _ in 0..4 {
        v.push(cur.read_i16::<BigEndian>()? as f64 * TEMP_SCALE);
    }
    v.push(cur.read_u16::<BigEndian>()? as f64 * S1_TIMER_SCALE);
    v.push(cur.read_u16::<BigEndian>()? as f64);
    Ok(v)
}

fn decode_s2(cur: &mut Cursor<&[u8]>) -> Values {
    let mut v = Vec::with_capacity(S2_FIELDS.len());
    v.push(cur.read_u16::<LittleEndian>()? as f64);
    v.push(cur.read_u32::<LittleEndian>()? as f64);
    for _ in 0..7 {
        v.push(cur.read_f32::<LittleEndian>()? as f64);
    }
    v.push(cur.read_u32::<LittleEndian>()? as f64);
    Ok(v)
}

fn read_scaled<B: ByteOrder>(
    cur: &mut Cursor<&[u8]>,
    n: usize,
    scale: f64,
    v: &mut Vec<f64>,
) -> std::io::Result<()> {
    for _ in 0..n {
        v.push(cur.read_i16::<B>()? as f64 * scale);
    }
    Ok(())
}

fn decode_a1<B: ByteOrder>(cur: &mut Cursor<&[u8]>) -> Values {
    let mut v = Vec::with_capacity(A1_FIELDS.len());
    read_scaled::<B>(cur, 3, ANGLE_SCALE, &mut v)?;
    read_scaled::<B>(cur, 3, RATE_SCALE, &mut v)?;
    read_scaled::<B>(cur, 3, ACCEL_SCALE, &mut v)?;
    read_scaled::<B>(cur, 3, MAG_SCALE, &mut v)?;
    read_scaled::<B>(cur, 1, TEMP_SCALE, &mut v)?;
    v.push(cur.read_u32::<B>()? as f64);
    v.push(cur.read_u16::<B>()? as f64);
    Ok(v)
}

fn decode_a2<B: ByteOrder>(cur: &mut Cursor<&[u8]>) -> Values {
    let mut v = Vec::with_capacity(A2_FIELDS.len());
    read_scaled::<B>(cur, 3, ANGLE_SCALE, &mut v)?;
    read_scaled::<B>(cur, 3, RATE_SCALE, &mut v)?;
    read_scaled::<B>(cur, 3, ACCEL_SCALE, &mut v)?;
    read_scaled::<B>(cur, 3, TEMP_SCALE, &mut v)?;
    v.push(cur.read_u32::<B>()? as f64);
    v.push(cur.read_u16::<B>()? as f64);
    Ok(v)
}

fn decode_fm(cur: &mut Cursor<&[u8]>, chips: usize, status_fields: usize) -> Values {
    let mut v = Vec::with_capacity(chips * 7 + status_fields);
    for _ in 0..chips * 7 {
        v.push(cur.read_i32::<LittleEndian>()? as f64);
    }
    for _ in 0..status_fields {
        v.push(cur.read_u16::<LittleEndian>()? as f64);
    }
    Ok(v)
}

fn decode_s3(cur: &mut Cursor<&[u8]>) -> Values {
    let mut v = Vec::with_capacity(S3_FIELDS.len());
    v.push(cur.read_u32::<LittleEndian>()? as f64);
    for _ in 0..3 {
        v.push(round_to(cur.read_i32::<LittleEndian>()? as f64 * S3_COUNT_SCALE, 5));
    }
    // Accel is rounded before the extra range step, not after.
    for _ in 0..3 {
        v.push(round_to(cur.read_i32::<LittleEndian>()? as f64 * S3_COUNT_SCALE, 5) * S3_ACCEL_EXTRA);
    }
    v.push(round_to(cur.read_i16::<LittleEndian>()? as f64 * S3_TEMP_SCALE, 3));
    v.push(cur.read_u16::<LittleEndian>()? as f64);
    v.push(cur.read_u32::<LittleEndian>()? as f64);
    Ok(v)
}

fn round_to(value: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (value * factor).round() / factor
}

fn decode_at(cur: &mut Cursor<&[u8]>) -> Values {
    let mut v = Vec::with_capacity(AT_FIELDS.len());
    read_scaled::<LittleEndian>(cur, 3, AT_RATE_SCALE, &mut v)?;
    read_scaled::<LittleEndian>(cur, 3, AT_ACCEL_SCALE, &mut v)?;
    read_scaled::<LittleEndian>(cur, 1, AT_TEMP_SCALE, &mut v)?;
    for _ in 0..3 {
        v.push(cur.read_u8()? as f64);
    }
    v.push(cur.read_u16::<LittleEndian>()? as f64);
    v.push(cur.read_u16::<LittleEndian>()? as f64);
    v.push(cur.read_u32::<LittleEndian>()? as f64 * AT_TOW_SCALE);
    v.push(cur.read_u16::<LittleEndian>()? as f64);
    for _ in 0..5 {
        v.push(cur.read_u8()? as f64);
    }
    v.push(cur.read_u16::<LittleEndian>()? as f64);
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;

    fn s1_payload(x_accel: i16, timer: u16, bit: u16) -> Vec<u8> {
        let mut p = Vec::new();
        p.write_i16::<BigEndian>(x_accel).unwrap();
        for _ in 0..9 {
            p.write_i16::<BigEndian>(0).unwrap();
        }
        p.write_u16::<BigEndian>(timer).unwrap();
        p.write_u16::<BigEndian>(bit).unwrap();
        p
    }

    #[test]
    fn test_s1_scaling() {
        let format = PacketFormat::new(PacketKind::S1);
        let sample = decode_payload(&format, &s1_payload(16384, 100, 0x1234)).unwrap();
        assert_eq!(sample.get("xAccel"), Some(5.0));
        assert!((sample.get("timer").unwrap() - 1525.9022).abs() < 1e-9);
        assert_eq!(sample.get("BITstatus"), Some(4660.0));
        for name in &S1_FIELDS[1..10] {
            assert_eq!(sample.get(name), Some(0.0), "{name}");
        }
        assert_eq!(sample.len(), 12);
    }

    #[test]
    fn test_s1_negative_rate() {
        let format = PacketFormat::new(PacketKind::S1);
        let mut p = s1_payload(0, 0, 0);
        p[6..8].copy_from_slice(&(-32768i16).to_be_bytes());
        let sample = decode_payload(&format, &p).unwrap();
        assert_eq!(sample.get("xRate"), Some(-630.0));
    }

    #[test]
    fn test_s2_floats() {
        let format = PacketFormat::new(PacketKind::S2);
        let mut p = Vec::new();
        p.write_u16::<LittleEndian>(2200).unwrap();
        p.write_u32::<LittleEndian>(345_600).unwrap();
        for f in [0.5f32, -1.0, 9.75, 0.0, 0.25, 2.0, 31.5] {
            p.write_f32::<LittleEndian>(f).unwrap();
        }
        p.write_u32::<LittleEndian>(7).unwrap();
        let sample = decode_payload(&format, &p).unwrap();
        assert_eq!(
            sample.values(),
            vec![2200.0, 345_600.0, 0.5, -1.0, 9.75, 0.0, 0.25, 2.0, 31.5, 7.0]
        );
    }

    #[test]
    fn test_a1_big_endian_angles() {
        let format = PacketFormat::new(PacketKind::A1);
        let mut p = vec![0u8; 32];
        p[0..2].copy_from_slice(&8192i16.to_be_bytes());
        p[26..30].copy_from_slice(&123_456u32.to_be_bytes());
        let sample = decode_payload(&format, &p).unwrap();
        assert_eq!(sample.get("rollAngle"), Some(45.0));
        assert_eq!(sample.get("timeITOW"), Some(123_456.0));
        assert_eq!(sample.len(), 15);
    }

    #[test]
    fn test_a2_layout() {
        let format = PacketFormat::new(PacketKind::A2);
        let mut p = vec![0u8; 30];
        p[18..20].copy_from_slice(&16384i16.to_be_bytes());
        p[28..30].copy_from_slice(&0xBEEFu16.to_be_bytes());
        let sample = decode_payload(&format, &p).unwrap();
        assert_eq!(sample.get("xRateTemp"), Some(50.0));
        assert_eq!(sample.get("BITstatus"), Some(0xBEEF as f64));
    }

    #[test]
    fn test_fm_three_chips() {
        let format = PacketFormat::new(PacketKind::Fm);
        let mut p = Vec::new();
        for i in 0..21 {
            p.write_i32::<LittleEndian>(i - 10).unwrap();
        }
        p.write_u16::<LittleEndian>(7).unwrap();
        p.write_u16::<LittleEndian>(99).unwrap();
        let sample = decode_payload(&format, &p).unwrap();
        assert_eq!(sample.chips, Some(3));
        assert_eq!(sample.len(), 23);
        assert_eq!(sample.get("xAccelCounts1"), Some(-10.0));
        assert_eq!(sample.get("TempCounts3"), Some(10.0));
        assert_eq!(sample.get("sampleIdx"), Some(99.0));
        assert_eq!(sample.get("extraCounter"), None);
    }

    #[test]
    fn test_fm_extra_counter() {
        let format = PacketFormat::fm(1, true).unwrap();
        let mut p = vec![0u8; 28];
        p.extend_from_slice(&[1, 0, 2, 0, 3, 0]);
        let sample = decode_payload(&format, &p).unwrap();
        assert_eq!(sample.get("extraCounter"), Some(3.0));
        assert_eq!(sample.len(), 10);
    }

    #[test]
    fn test_s3_scaling() {
        let format = PacketFormat::new(PacketKind::S3);
        let mut p = Vec::new();
        p.write_u32::<LittleEndian>(42).unwrap();
        for r in [1_000_000i32, -2_000_000, 0] {
            p.write_i32::<LittleEndian>(r).unwrap();
        }
        for a in [10_000_000i32, 0, 0] {
            p.write_i32::<LittleEndian>(a).unwrap();
        }
        p.write_i16::<LittleEndian>(3125).unwrap();
        p.write_u16::<LittleEndian>(1).unwrap();
        p.write_u32::<LittleEndian>(2).unwrap();
        let sample = decode_payload(&format, &p).unwrap();
        assert_eq!(sample.get("num"), Some(42.0));
        assert_eq!(sample.get("xRate"), Some(1_000_000.0 * 0.000001));
        assert_eq!(sample.get("yRate"), Some(-2_000_000.0 * 0.000001));
        assert_eq!(sample.get("xAccel"), Some(10_000_000.0 * 0.000001 * 0.1));
        assert_eq!(sample.get("boardTemp"), Some(3125.0 * 0.008));
        assert_eq!(sample.get("productid"), Some(2.0));
    }

    #[test]
    fn test_s3_rounds_counts() {
        let format = PacketFormat::new(PacketKind::S3);
        let mut p = Vec::new();
        p.write_u32::<LittleEndian>(1).unwrap();
        for r in [1_234_567i32, -7_654_321, 4] {
            p.write_i32::<LittleEndian>(r).unwrap();
        }
        for a in [1_234_567i32, 0, 0] {
            p.write_i32::<LittleEndian>(a).unwrap();
        }
        p.write_i16::<LittleEndian>(1001).unwrap();
        p.write_u16::<LittleEndian>(0).unwrap();
        p.write_u32::<LittleEndian>(0).unwrap();
        let sample = decode_payload(&format, &p).unwrap();
        assert_eq!(sample.get("xRate"), Some(1.23457));
        assert_eq!(sample.get("yRate"), Some(-7.65432));
        assert_eq!(sample.get("zRate"), Some(0.0));
        assert_eq!(sample.get("xAccel"), Some(1.23457 * 0.1));
        assert_eq!(sample.get("boardTemp"), Some(8.008));
    }

    #[test]
    fn test_at_scaling() {
        let format = PacketFormat::new(PacketKind::At);
        let mut p = Vec::new();
        for r in [16384i16, 0, 0, -16384, 0, 0, 8192] {
            p.write_i16::<LittleEndian>(r).unwrap();
        }
        p.extend_from_slice(&[0, 1, 2]);
        p.write_u16::<LittleEndian>(5).unwrap();
        p.write_u16::<LittleEndian>(2300).unwrap();
        p.write_u32::<LittleEndian>(1500).unwrap();
        p.write_u16::<LittleEndian>(2024).unwrap();
        p.extend_from_slice(&[6, 7, 8, 9, 10]);
        p.write_u16::<LittleEndian>(999).unwrap();
        let sample = decode_payload(&format, &p).unwrap();
        assert_eq!(sample.get("xRate"), Some(150.0));
        assert_eq!(sample.get("xAccel"), Some(-6.0));
        assert_eq!(sample.get("Temp"), Some(50.0));
        assert_eq!(sample.get("TimeOfWeek"), Some(1500.0 * 1e-3));
        assert_eq!(sample.get("year"), Some(2024.0));
        assert_eq!(sample.get("milliseconds"), Some(999.0));
    }

    #[test]
    fn test_payload_length_checked() {
        let format = PacketFormat::new(PacketKind::S1);
        assert!(matches!(
            decode_payload(&format, &[0u8; 10]),
            Err(FrameError::PayloadLength { expected: 24, actual: 10, .. })
        ));
    }

    #[test]
    fn test_decode_frame_validates() {
        let format = PacketFormat::new(PacketKind::S1);
        let mut frame = format.encode(&s1_payload(1, 2, 3)).unwrap();
        assert!(decode_frame(&format, &frame).is_ok());
        frame[6] ^= 0x80;
        assert!(decode_frame(&format, &frame).is_err());
    }
}
