//! IMU-Core: serial protocol stack for Aceinna-style inertial sensors.
//!
//! This crate talks to an IMU over a serial link: it resynchronizes and
//! decodes the streaming packet formats, runs the command/response
//! protocol used for configuration, and drives the bootloader firmware
//! upgrade.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Constants, command codes, envelope framing, CRC engines
//! - **Packet**: Packet registry, frame validation, decoders, log replay
//! - **Transport**: Serial communication abstraction (serialport, mock)
//! - **Stream**: Frame synchronizer, bounded queue, logging and real-time consumers
//! - **Command**: Request/response exchange and device commands
//! - **Upgrade**: Firmware upgrade state machine
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: High-level orchestrator
//!
//! # Example
//!
//! ```no_run
//! use imu_core::session::{ImuSession, SessionConfig};
//!
//! let config = SessionConfig {
//!     port: "/dev/ttyUSB0".to_string(),
//!     ..Default::default()
//! };
//!
//! let session = ImuSession::new(config);
//! let info = session.command_client()?.get_product_info()?;
//! println!("{info}");
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod command;
pub mod events;
pub mod packet;
pub mod protocol;
pub mod session;
pub mod stream;
pub mod transport;
pub mod upgrade;

// Re-exports for convenience
pub use command::{CommandClient, CommandError, FieldValue, LockRegion, ProductInfo};
pub use events::{ImuEvent, ImuObserver, LogLevel, NullObserver, TracingObserver};
pub use packet::{ChannelView, DecodedSample, FrameError, LogReplay, PacketFormat, PacketKind, RawFrame};
pub use protocol::{CommandCode, Envelope};
pub use session::{ImuSession, SessionConfig, kind_from_log_name, open_log};
pub use stream::{CancelToken, SampleStream, StreamError, StreamQueue};
pub use transport::{MockTransport, SerialPortTransport, SerialTransport, TransportError};
pub use upgrade::{FirmwareImage, UpgradeError, UpgradeRun, UpgradeState, UpgradeTiming, Upgrader};
