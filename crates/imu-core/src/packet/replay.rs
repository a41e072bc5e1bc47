//! Offline decoding of logged frame files.

use std::path::Path;

use tracing::info;

use super::decode::DecodedSample;
use super::deframer::{DeframeStats, Deframer};
use super::format::{FrameError, PacketFormat};

const REPLAY_CHUNK: usize = 4096;

/// One decoded record from a log file.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayItem {
    pub sample: DecodedSample,
    /// Share of the file consumed so far, 0-100.
    pub progress: f64,
}

/// Iterator over the samples stored in a binary log.
///
/// Frames are located and checked with the same rules as the live stream,
/// so a truncated or corrupted log yields only its intact frames.
#[derive(Debug)]
pub struct LogReplay {
    data: Vec<u8>,
    position: usize,
    deframer: Deframer,
}

impl LogReplay {
    pub fn new(format: PacketFormat, data: Vec<u8>) -> Self {
        Self {
            data,
            position: 0,
            deframer: Deframer::new(format),
        }
    }

    pub fn open<P: AsRef<Path>>(format: PacketFormat, path: P) -> std::io::Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        info!(path = %path.as_ref().display(), bytes = data.len(), kind = %format.kind(), "Replaying log");
        Ok(Self::new(format, data))
    }

    pub fn stats(&self) -> DeframeStats {
        self.deframer.stats()
    }

    fn progress(&self) -> f64 {
        if self.data.is_empty() {
            return 100.0;
        }
        let consumed = self.position - self.deframer.buffered();
        consumed as f64 / self.data.len() as f64 * 100.0
    }
}

impl Iterator for LogReplay {
    type Item = Result<ReplayItem, FrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(frame) = self.deframer.next_frame() {
                let format = *self.deframer.format();
                let progress = self.progress();
                return Some(frame.decode(&format).map(|sample| ReplayItem { sample, progress }));
            }
            if self.position >= self.data.len() {
                return None;
            }
            let end = (self.position + REPLAY_CHUNK).min(self.data.len());
            self.deframer.extend(&self.data[self.position..end]);
            self.position = end;
        }
    }
}
