//! Event system for UI decoupling.
//!
//! Allows CLI/GUI front ends to follow streaming and upgrade progress
//! without tight coupling to the core logic.

use std::fmt;

use crate::upgrade::UpgradeState;

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Events emitted by sessions, the command layer and the upgrader.
#[derive(Debug, Clone)]
pub enum ImuEvent {
    /// Serial link opened.
    Connected { port: String, baud: u32 },
    /// Upgrade state changed.
    StateChanged { from: UpgradeState, to: UpgradeState },
    /// Progress update for the current operation.
    Progress {
        operation: String,
        current: u64,
        total: u64,
    },
    /// Log message.
    Log { level: LogLevel, message: String },
    /// Bytes sent/received.
    Packet {
        direction: PacketDirection,
        code: Option<String>,
        length: usize,
        data: Option<Vec<u8>>,
    },
    /// The real-time watchdog reopened the link.
    StreamRestarted { attempt: u32 },
    /// Error occurred.
    Error { stage: String, message: String },
    /// Operation completed successfully.
    Complete,
}

/// Byte direction on the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    Tx, // Host -> Device
    Rx, // Device -> Host
}

impl fmt::Display for PacketDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketDirection::Tx => write!(f, "TX"),
            PacketDirection::Rx => write!(f, "RX"),
        }
    }
}

/// Observer trait for receiving events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait ImuObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &ImuEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl ImuObserver for NullObserver {
    fn on_event(&self, _event: &ImuEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl ImuObserver for TracingObserver {
    fn on_event(&self, event: &ImuEvent) {
        match event {
            ImuEvent::Connected { port, baud } => {
                tracing::info!(port = %port, baud, "Connected");
            }
            ImuEvent::StateChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "Upgrade state changed");
            }
            ImuEvent::Progress {
                operation,
                current,
                total,
            } => {
                let pct = if *total > 0 {
                    (*current * 100) / *total
                } else {
                    0
                };
                tracing::debug!(operation = %operation, progress = %format!("{}%", pct), "Progress");
            }
            ImuEvent::Log { level, message } => match level {
                LogLevel::Trace => tracing::trace!("{}", message),
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
            ImuEvent::Packet {
                direction,
                code,
                length,
                ..
            } => {
                tracing::trace!(
                    dir = %direction,
                    code = code.as_deref().unwrap_or("-"),
                    len = length,
                    "Serial packet"
                );
            }
            ImuEvent::StreamRestarted { attempt } => {
                tracing::warn!(attempt, "Stream restarted after silence");
            }
            ImuEvent::Error { stage, message } => {
                tracing::error!(stage = %stage, "Error: {}", message);
            }
            ImuEvent::Complete => {
                tracing::info!("Operation complete");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Observer that records every event.
    #[derive(Default)]
    pub struct RecordingObserver {
        pub events: Mutex<Vec<ImuEvent>>,
    }

    impl RecordingObserver {
        pub fn take(&self) -> Vec<ImuEvent> {
            std::mem::take(&mut *self.events.lock().unwrap())
        }
    }

    impl ImuObserver for RecordingObserver {
        fn on_event(&self, event: &ImuEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }
}
