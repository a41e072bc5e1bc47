//! Real-time decoding consumer with a liveness watchdog.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::StreamError;
use super::cancel::CancelToken;
use super::queue::StreamQueue;
use super::sync::{FrameSynchronizer, SyncConfig};
use crate::events::{ImuEvent, ImuObserver, NullObserver};
use crate::packet::{DecodedSample, PacketFormat};
use crate::protocol::VISUAL_RATE_HZ;
use crate::transport::{SerialTransport, TransportError};

/// Restart policy for a stream that goes quiet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogConfig {
    /// Longest gap between frames before the link is reopened.
    pub silence: Duration,
    /// Reopen attempts before giving up.
    pub max_attempts: u32,
    /// Pause between closing and reopening the port.
    pub reopen_delay: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            silence: Duration::from_secs(3),
            max_attempts: 3,
            reopen_delay: Duration::from_millis(100),
        }
    }
}

/// Forwards every Nth frame so the delivered rate stays near 20 Hz.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decimator {
    every_nth: u32,
    count: u32,
}

impl Decimator {
    pub fn for_output_rate(odr: u32) -> Self {
        let target = if odr > 50 {
            VISUAL_RATE_HZ
        } else if odr == 50 {
            VISUAL_RATE_HZ / 2
        } else {
            odr
        };
        Self {
            every_nth: (odr / target.max(1)).max(1),
            count: 0,
        }
    }

    pub fn every_nth(&self) -> u32 {
        self.every_nth
    }

    /// Count one frame; true when it should be delivered.
    pub fn accept(&mut self) -> bool {
        self.count += 1;
        if self.count >= self.every_nth {
            self.count = 0;
            true
        } else {
            false
        }
    }
}

struct Worker<T> {
    cancel: CancelToken,
    handle: JoinHandle<Result<T, StreamError>>,
}

/// Lazy, unbounded sequence of decoded samples from a live device.
///
/// The synchronizer runs on its own thread; this iterator is the single
/// consumer. If no frame arrives within the watchdog window the port is
/// closed and reopened through `opener`, up to `max_attempts` times, after
/// which one [`StreamError::InitFailed`] is yielded and the stream ends.
/// Cancelling the token ends the stream and drops any queued frames.
pub struct SampleStream<T, F>
where
    T: SerialTransport + 'static,
    F: FnMut() -> Result<T, TransportError>,
{
    opener: F,
    format: PacketFormat,
    queue: Arc<StreamQueue>,
    cancel: CancelToken,
    worker: Option<Worker<T>>,
    decimator: Decimator,
    watchdog: WatchdogConfig,
    sync_config: SyncConfig,
    observer: Arc<dyn ImuObserver>,
    last_frame: Instant,
    restarts: u32,
    finished: bool,
}

impl<T, F> SampleStream<T, F>
where
    T: SerialTransport + 'static,
    F: FnMut() -> Result<T, TransportError>,
{
    pub fn new(opener: F, format: PacketFormat, output_rate: u32, cancel: CancelToken) -> Self {
        Self {
            opener,
            format,
            queue: Arc::new(StreamQueue::for_output_rate(output_rate)),
            cancel,
            worker: None,
            decimator: Decimator::for_output_rate(output_rate),
            watchdog: WatchdogConfig::default(),
            sync_config: SyncConfig::default(),
            observer: Arc::new(NullObserver),
            last_frame: Instant::now(),
            restarts: 0,
            finished: false,
        }
    }

    pub fn with_watchdog(mut self, watchdog: WatchdogConfig) -> Self {
        self.watchdog = watchdog;
        self
    }

    pub fn with_sync_config(mut self, config: SyncConfig) -> Self {
        self.sync_config = config;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ImuObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn format(&self) -> &PacketFormat {
        &self.format
    }

    /// Frames dropped by queue overflow so far.
    pub fn evicted(&self) -> u64 {
        self.queue.evicted()
    }

    fn start_worker(&mut self) -> Result<(), StreamError> {
        let transport = (self.opener)()?;
        info!(port = transport.port_name(), kind = %self.format.kind(), "Starting real-time stream");
        let cancel = CancelToken::new();
        let handle = FrameSynchronizer::new(transport, self.format, self.queue.clone(), cancel.clone())
            .with_config(self.sync_config)
            .spawn();
        self.worker = Some(Worker { cancel, handle });
        self.last_frame = Instant::now();
        Ok(())
    }

    fn stop_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.cancel.cancel();
            match worker.handle.join() {
                Ok(Ok(_transport)) => {}
                Ok(Err(e)) => debug!(error = %e, "Synchronizer ended with error"),
                Err(_) => warn!("Synchronizer thread panicked"),
            }
        }
    }

    fn restart(&mut self) {
        self.restarts += 1;
        warn!(attempt = self.restarts, kind = %self.format.kind(), "No frames received, reopening port");
        self.observer.on_event(&ImuEvent::StreamRestarted {
            attempt: self.restarts,
        });
        self.stop_worker();
        thread::sleep(self.watchdog.reopen_delay);
        if let Err(e) = self.start_worker() {
            warn!(error = %e, "Reopen failed");
            self.last_frame = Instant::now();
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        self.stop_worker();
        self.queue.clear();
    }
}

impl<T, F> Iterator for SampleStream<T, F>
where
    T: SerialTransport + 'static,
    F: FnMut() -> Result<T, TransportError>,
{
    type Item = Result<DecodedSample, StreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if self.worker.is_none()
            && self.restarts == 0
            && let Err(e) = self.start_worker()
        {
            self.finished = true;
            return Some(Err(e));
        }

        loop {
            if self.cancel.is_cancelled() {
                self.finish();
                return None;
            }

            if let Some(frame) = self.queue.pop() {
                if !frame.as_bytes().starts_with(self.format.sync()) {
                    continue;
                }
                self.last_frame = Instant::now();
                self.restarts = 0;
                if self.decimator.accept() {
                    return Some(frame.decode(&self.format).map_err(StreamError::from));
                }
                continue;
            }

            if self.last_frame.elapsed() >= self.watchdog.silence {
                if self.restarts >= self.watchdog.max_attempts {
                    let attempts = self.restarts;
                    self.finish();
                    self.observer.on_event(&ImuEvent::Error {
                        stage: "stream".to_string(),
                        message: format!("no {} frames after {} restarts", self.format.kind(), attempts),
                    });
                    return Some(Err(StreamError::InitFailed {
                        kind: self.format.kind(),
                        attempts,
                    }));
                }
                self.restart();
                continue;
            }

            thread::sleep(self.sync_config.poll_interval);
        }
    }
}

impl<T, F> Drop for SampleStream<T, F>
where
    T: SerialTransport + 'static,
    F: FnMut() -> Result<T, TransportError>,
{
    fn drop(&mut self) {
        self.stop_worker();
    }
}
