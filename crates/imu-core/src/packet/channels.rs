//! Grouping of decoded fields for live plotting.

use super::decode::DecodedSample;
use super::format::PacketKind;

/// Sensor channels extracted from one sample, one entry per sensor group
/// (FM carries one group per chip).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelView {
    pub accels: Vec<[f64; 3]>,
    pub gyros: Vec<[f64; 3]>,
    pub temps: Vec<f64>,
    pub angles: Vec<[f64; 2]>,
}

struct ChannelMap {
    accel: usize,
    gyro: usize,
    temp: usize,
    angle: Option<usize>,
}

fn channel_map(kind: PacketKind) -> ChannelMap {
    match kind {
        PacketKind::S1 => ChannelMap { accel: 0, gyro: 3, temp: 9, angle: None },
        PacketKind::S2 => ChannelMap { accel: 2, gyro: 5, temp: 8, angle: None },
        PacketKind::S3 => ChannelMap { accel: 4, gyro: 1, temp: 7, angle: None },
        PacketKind::A1 => ChannelMap { accel: 6, gyro: 3, temp: 12, angle: Some(0) },
        PacketKind::A2 => ChannelMap { accel: 6, gyro: 3, temp: 9, angle: Some(0) },
        PacketKind::Fm => ChannelMap { accel: 0, gyro: 3, temp: 6, angle: None },
        PacketKind::At => ChannelMap { accel: 3, gyro: 0, temp: 6, angle: None },
    }
}

impl DecodedSample {
    /// Accelerometer, gyro, temperature and angle groups of this sample.
    ///
    /// Groups whose fields are missing from a truncated sample are left out.
    pub fn channels(&self) -> ChannelView {
        let v = self.values();
        let map = channel_map(self.kind);
        let at = |i: usize| v.get(i).copied();
        let triple = |i: usize| Some([at(i)?, at(i + 1)?, at(i + 2)?]);

        let mut view = ChannelView::default();
        let (groups, stride) = match self.chips {
            Some(chips) => (chips, 7),
            None => (1, 0),
        };
        for g in 0..groups {
            let base = g * stride;
            view.accels.extend(triple(base + map.accel));
            view.gyros.extend(triple(base + map.gyro));
            view.temps.extend(at(base + map.temp));
        }
        if let Some(a) = map.angle {
            if let (Some(roll), Some(pitch)) = (at(a), at(a + 1)) {
                view.angles.push([roll, pitch]);
            }
        }
        view
    }
}

#[cfg(test)]
mod tests {
    use crate::packet::decode::{DecodedSample, Field, decode_payload};
    use crate::packet::format::{PacketFormat, PacketKind};

    #[test]
    fn test_s3_gyro_before_accel() {
        let format = PacketFormat::new(PacketKind::S3);
        let mut p = vec![0u8; 36];
        // xRate counts = 2_000_000
        p[4..8].copy_from_slice(&2_000_000i32.to_le_bytes());
        let view = decode_payload(&format, &p).unwrap().channels();
        assert_eq!(view.gyros, vec![[2.0, 0.0, 0.0]]);
        assert_eq!(view.accels.len(), 1);
        assert!(view.angles.is_empty());
    }

    #[test]
    fn test_fm_group_per_chip() {
        let format = PacketFormat::fm(4, false).unwrap();
        let mut p = Vec::new();
        for i in 0..28i32 {
            p.extend_from_slice(&i.to_le_bytes());
        }
        p.extend_from_slice(&[0; 4]);
        let view = decode_payload(&format, &p).unwrap().channels();
        assert_eq!(view.accels.len(), 4);
        assert_eq!(view.accels[1], [7.0, 8.0, 9.0]);
        assert_eq!(view.gyros[3], [24.0, 25.0, 26.0]);
        assert_eq!(view.temps, vec![6.0, 13.0, 20.0, 27.0]);
    }

    #[test]
    fn test_a1_angles() {
        let format = PacketFormat::new(PacketKind::A1);
        let mut p = vec![0u8; 32];
        p[2..4].copy_from_slice(&(-8192i16).to_be_bytes());
        let view = decode_payload(&format, &p).unwrap().channels();
        assert_eq!(view.angles, vec![[0.0, -45.0]]);
    }

    #[test]
    fn test_truncated_sample_skips_missing_groups() {
        let names = ["xAccel", "yAccel", "zAccel", "xRate"];
        let sample = DecodedSample {
            kind: PacketKind::S1,
            chips: None,
            fields: names.iter().map(|&name| Field { name, value: 1.0 }).collect(),
        };
        let view = sample.channels();
        assert_eq!(view.accels, vec![[1.0, 1.0, 1.0]]);
        assert!(view.gyros.is_empty());
        assert!(view.temps.is_empty());

        let fm = DecodedSample {
            kind: PacketKind::Fm,
            chips: Some(3),
            fields: Vec::new(),
        };
        assert_eq!(fm.channels(), super::ChannelView::default());
    }
}
