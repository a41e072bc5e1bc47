//! Byte-stream resynchronization.
//!
//! The [`Deframer`] accumulates raw bytes and cuts out exact-length frames
//! starting at the format's sync bytes. Bytes that never lead to a valid
//! frame are dropped, which is how a misaligned stream resynchronizes.

use tracing::{trace, warn};

use super::decode::{DecodedSample, decode_payload};
use super::format::{FrameError, PacketFormat, PacketKind};

/// An exact-length, integrity-checked frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    kind: PacketKind,
    bytes: Vec<u8>,
}

impl RawFrame {
    /// Validate `bytes` against `format` and wrap them.
    pub fn new(format: &PacketFormat, bytes: Vec<u8>) -> Result<Self, FrameError> {
        format.validate(&bytes)?;
        Ok(Self {
            kind: format.kind(),
            bytes,
        })
    }

    pub fn kind(&self) -> PacketKind {
        self.kind
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn decode(&self, format: &PacketFormat) -> Result<DecodedSample, FrameError> {
        decode_payload(format, format.payload(&self.bytes))
    }
}

/// Counters kept while deframing.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeframeStats {
    pub frames: u64,
    pub integrity_failures: u64,
    pub discarded_bytes: u64,
}

/// Incremental frame extractor for one format.
#[derive(Debug)]
pub struct Deframer {
    format: PacketFormat,
    buffer: Vec<u8>,
    stats: DeframeStats,
}

impl Deframer {
    pub fn new(format: PacketFormat) -> Self {
        Self {
            format,
            buffer: Vec::with_capacity(format.frame_len() * 4),
            stats: DeframeStats::default(),
        }
    }

    pub fn format(&self) -> &PacketFormat {
        &self.format
    }

    pub fn stats(&self) -> DeframeStats {
        self.stats
    }

    /// Bytes held but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Next valid frame from the buffered bytes, if one is complete.
    pub fn next_frame(&mut self) -> Option<RawFrame> {
        let frame_len = self.format.frame_len();
        let sync = self.format.sync();

        while self.buffer.len() >= frame_len {
            let Some(pos) = find(&self.buffer, sync) else {
                // Keep a possible partial sync at the tail.
                let keep = sync.len() - 1;
                self.discard(self.buffer.len() - keep);
                return None;
            };
            if pos + frame_len > self.buffer.len() {
                self.discard(pos);
                return None;
            }

            let candidate = &self.buffer[pos..pos + frame_len];
            match self.format.validate(candidate) {
                Ok(()) => {
                    let frame = RawFrame {
                        kind: self.format.kind(),
                        bytes: candidate.to_vec(),
                    };
                    self.discard(pos);
                    self.buffer.drain(..frame_len);
                    self.stats.frames += 1;
                    trace!(kind = %frame.kind, offset = pos, "Frame extracted");
                    return Some(frame);
                }
                Err(e) => {
                    warn!(error = %e, "Dropping candidate frame");
                    self.stats.integrity_failures += 1;
                    self.discard(pos + 1);
                }
            }
        }
        None
    }

    /// Append `bytes` and collect every frame that becomes complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<RawFrame> {
        self.extend(bytes);
        std::iter::from_fn(|| self.next_frame()).collect()
    }

    fn discard(&mut self, n: usize) {
        if n > 0 {
            self.buffer.drain(..n);
            self.stats.discarded_bytes += n as u64;
        }
    }
}

/// Position of the first occurrence of `needle` in `haystack`.
pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
