//! Firmware upgrade over the bootloader's WA block protocol.

pub mod image;
pub mod machine;
pub mod runner;

use thiserror::Error;

use crate::command::CommandError;
use crate::transport::TransportError;

pub use image::{Block, BlockCursor, FirmwareImage};
pub use machine::{UpgradeSession, UpgradeState};
pub use runner::{UpgradeRun, UpgradeTiming, Upgrader};

#[derive(Error, Debug)]
pub enum UpgradeError {
    #[error("Firmware image is empty")]
    EmptyImage,
    #[error("Firmware image too large: {0} bytes")]
    ImageTooLarge(usize),
    #[error("Could not enter quiet mode: {0}")]
    QuietFailed(#[source] CommandError),
    #[error("Bootloader entry failed: {0}")]
    BootloaderEntryFailed(String),
    #[error("Block write failed at offset {offset}: {reason}")]
    BlockWriteFailed { offset: usize, reason: String },
    #[error("Command error: {0}")]
    Command(#[from] CommandError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
