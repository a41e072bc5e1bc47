//! Frame-length negotiation against a live stream.

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use super::StreamError;
use crate::packet::{PacketFormat, PacketKind, deframer::find};
use crate::protocol::{ENVELOPE_HEADER_LEN, ENVELOPE_OVERHEAD, SERIAL_READ_CHUNK, SYNC_POLL_INTERVAL};
use crate::transport::SerialTransport;

/// Learn the effective frame length of `kind` from the device's output.
///
/// Enveloped formats carry their payload length right after the sync
/// bytes, so the first sighting fixes the frame length (and for FM the
/// chip count). S3 and AT are fixed and never queried. When nothing shows
/// up before `timeout` the default length is kept.
#[instrument(skip(transport), fields(port = %transport.port_name()))]
pub fn negotiate_format<T: SerialTransport + ?Sized>(
    transport: &mut T,
    kind: PacketKind,
    timeout: Duration,
) -> Result<PacketFormat, StreamError> {
    let default = PacketFormat::new(kind);
    if !kind.is_enveloped() {
        return Ok(default);
    }
    let start = Instant::now();
    let mut data = Vec::new();
    while start.elapsed() < timeout {
        data.extend(transport.read(SERIAL_READ_CHUNK)?);
        if let Some(format) = detect_format(kind, &data) {
            return Ok(format);
        }
        thread::sleep(SYNC_POLL_INTERVAL);
    }

    debug!(%kind, "No frame seen, keeping default length");
    Ok(default)
}

/// Frame format announced by the first `kind` frame header in `data`.
///
/// `None` until a complete header is present. Fixed formats always
/// resolve to their default length.
pub fn detect_format(kind: PacketKind, data: &[u8]) -> Option<PacketFormat> {
    let default = PacketFormat::new(kind);
    if !kind.is_enveloped() {
        return Some(default);
    }
    let pos = find(data, default.sync())?;
    let declared = *data.get(pos + ENVELOPE_HEADER_LEN - 1)? as usize;
    let frame_len = declared + ENVELOPE_OVERHEAD;
    match PacketFormat::with_frame_len(kind, frame_len) {
        Ok(format) => {
            info!(%kind, frame_len, "Negotiated frame length");
            Some(format)
        }
        Err(e) => {
            warn!(%kind, frame_len, error = %e, "Device reported an unusable length, keeping default");
            Some(default)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    #[test]
    fn test_fm_length_from_stream() {
        let mut mock = MockTransport::new();
        let format = PacketFormat::fm(2, true).unwrap();
        let frame = format.encode(&vec![0u8; format.payload_len()]).unwrap();
        mock.feed(&[0xAA, 0x01]);
        mock.feed(&frame);

        let negotiated =
            negotiate_format(&mut mock, PacketKind::Fm, Duration::from_millis(200)).unwrap();
        assert_eq!(negotiated.frame_len(), frame.len());
        let layout = negotiated.fm_layout().unwrap();
        assert_eq!(layout.chips, 2);
        assert_eq!(layout.status_fields, 3);
    }

    #[test]
    fn test_fixed_formats_not_queried() {
        let mut mock = MockTransport::new();
        mock.feed(&[0x55, 0xAA, 0x24, 0x01]);
        let format =
            negotiate_format(&mut mock, PacketKind::S3, Duration::from_millis(50)).unwrap();
        assert_eq!(format.frame_len(), 40);
        assert_eq!(mock.pending_rx(), 4);
    }

    #[test]
    fn test_detect_needs_length_byte() {
        let format = PacketFormat::fm(1, false).unwrap();
        let frame = format.encode(&vec![0u8; format.payload_len()]).unwrap();
        assert!(detect_format(PacketKind::Fm, &frame[..4]).is_none());
        assert_eq!(detect_format(PacketKind::Fm, &frame[..5]), Some(format));
        assert_eq!(
            detect_format(PacketKind::At, &[]).map(|f| f.frame_len()),
            Some(39)
        );
    }

    #[test]
    fn test_silence_keeps_default() {
        let mut mock = MockTransport::new();
        let format =
            negotiate_format(&mut mock, PacketKind::Fm, Duration::from_millis(30)).unwrap();
        assert_eq!(format.frame_len(), 95);
    }
}
