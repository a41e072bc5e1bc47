//! Frame synchronizer: the producer half of a streaming session.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use super::StreamError;
use super::cancel::CancelToken;
use super::queue::StreamQueue;
use crate::packet::{Deframer, PacketFormat};
use crate::protocol::{SERIAL_READ_CHUNK, SYNC_POLL_INTERVAL};
use crate::transport::SerialTransport;

/// Polling knobs for [`FrameSynchronizer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Upper bound on bytes taken from the link per poll.
    pub read_chunk: usize,
    /// Pause between polls.
    pub poll_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            read_chunk: SERIAL_READ_CHUNK,
            poll_interval: SYNC_POLL_INTERVAL,
        }
    }
}

/// Reads a byte source, locates frames of one format and feeds the queue.
///
/// The synchronizer owns the transport for the whole session; [`run`]
/// hands it back once the session is cancelled.
///
/// [`run`]: FrameSynchronizer::run
pub struct FrameSynchronizer<T: SerialTransport> {
    transport: T,
    deframer: Deframer,
    queue: Arc<StreamQueue>,
    cancel: CancelToken,
    config: SyncConfig,
}

impl<T: SerialTransport> FrameSynchronizer<T> {
    pub fn new(
        transport: T,
        format: PacketFormat,
        queue: Arc<StreamQueue>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            transport,
            deframer: Deframer::new(format),
            queue,
            cancel,
            config: SyncConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn format(&self) -> &PacketFormat {
        self.deframer.format()
    }

    /// One read plus frame extraction. Returns the number of frames queued.
    pub fn poll_once(&mut self) -> Result<usize, StreamError> {
        let bytes = self.transport.read(self.config.read_chunk)?;
        if bytes.is_empty() {
            return Ok(0);
        }
        let frames = self.deframer.push(&bytes);
        let count = frames.len();
        for frame in frames {
            self.queue.push(frame);
        }
        Ok(count)
    }

    /// Poll until cancelled, then clear the queue and return the transport.
    ///
    /// A link failure cancels the shared token so consumers of the queue stop
    /// with the producer.
    #[instrument(skip(self), fields(port = %self.transport.port_name(), kind = %self.deframer.format().kind()))]
    pub fn run(mut self) -> Result<T, StreamError> {
        info!(frame_len = self.deframer.format().frame_len(), "Synchronizer started");
        let result = loop {
            if self.cancel.is_cancelled() {
                break Ok(());
            }
            if let Err(e) = self.poll_once() {
                warn!(error = %e, "Synchronizer read failed");
                self.cancel.cancel();
                break Err(e);
            }
            thread::sleep(self.config.poll_interval);
        };

        self.queue.clear();
        let stats = self.deframer.stats();
        debug!(
            frames = stats.frames,
            integrity_failures = stats.integrity_failures,
            discarded = stats.discarded_bytes,
            "Synchronizer stopped"
        );
        result.map(|()| self.transport)
    }
}

impl<T: SerialTransport + 'static> FrameSynchronizer<T> {
    /// Run on a dedicated thread.
    pub fn spawn(self) -> JoinHandle<Result<T, StreamError>> {
        thread::spawn(move || self.run())
    }
}
