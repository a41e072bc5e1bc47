//! File-logging consumer.

use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{info, instrument};

use super::StreamError;
use super::cancel::CancelToken;
use super::queue::StreamQueue;

/// Totals for a finished logging session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LogSummary {
    pub frames: u64,
    pub bytes: u64,
    /// Frames lost to queue overflow while logging.
    pub evicted: u64,
}

/// Drains the stream queue into a sink once per sample period.
pub struct FrameLogger<W: Write> {
    sink: W,
    queue: Arc<StreamQueue>,
    cancel: CancelToken,
    period: Duration,
}

impl<W: Write> FrameLogger<W> {
    pub fn new(sink: W, queue: Arc<StreamQueue>, cancel: CancelToken, output_rate: u32) -> Self {
        Self {
            sink,
            queue,
            cancel,
            period: Duration::from_secs_f64(1.0 / output_rate.max(1) as f64),
        }
    }

    /// Append raw frames until cancelled. Frames still queued when the
    /// token fires belong to the stopped session and are not written.
    #[instrument(skip(self))]
    pub fn run(mut self) -> Result<(LogSummary, W), StreamError> {
        let mut summary = LogSummary::default();
        while !self.cancel.is_cancelled() {
            while let Some(frame) = self.queue.pop() {
                self.sink.write_all(frame.as_bytes())?;
                summary.frames += 1;
                summary.bytes += frame.len() as u64;
            }
            thread::sleep(self.period);
        }
        self.sink.flush()?;
        summary.evicted = self.queue.evicted();
        info!(frames = summary.frames, bytes = summary.bytes, evicted = summary.evicted, "Logging finished");
        Ok((summary, self.sink))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{PacketFormat, PacketKind, RawFrame};

    #[test]
    fn test_writes_queued_frames_until_cancelled() {
        let format = PacketFormat::new(PacketKind::S1);
        let bytes = format.encode(&vec![9u8; format.payload_len()]).unwrap();
        let queue = Arc::new(StreamQueue::new(16));
        queue.push(RawFrame::new(&format, bytes.clone()).unwrap());
        queue.push(RawFrame::new(&format, bytes.clone()).unwrap());

        let cancel = CancelToken::new();
        let logger = FrameLogger::new(Vec::new(), queue.clone(), cancel.clone(), 200);
        let handle = thread::spawn(move || logger.run());
        while !queue.is_empty() {
            thread::sleep(Duration::from_millis(1));
        }
        cancel.cancel();

        let (summary, sink) = handle.join().unwrap().unwrap();
        assert_eq!(summary.frames, 2);
        assert_eq!(summary.bytes, 62);
        assert_eq!(sink, [bytes.clone(), bytes].concat());
    }
}
