//! Streaming session: synchronizer, queue and consumers.

pub mod cancel;
pub mod logger;
pub mod negotiate;
pub mod queue;
pub mod realtime;
pub mod sync;

use thiserror::Error;

use crate::packet::{FrameError, PacketKind};
use crate::transport::TransportError;

pub use cancel::CancelToken;
pub use logger::{FrameLogger, LogSummary};
pub use negotiate::{detect_format, negotiate_format};
pub use queue::StreamQueue;
pub use realtime::{Decimator, SampleStream, WatchdogConfig};
pub use sync::{FrameSynchronizer, SyncConfig};

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("No {kind} frames received after {attempts} restarts, check port and packet type")]
    InitFailed { kind: PacketKind, attempts: u32 },
}
