//! Reset, mode switching and memory protection.

use std::fmt;
use std::str::FromStr;

use tracing::{info, instrument};

use super::CommandError;
use super::client::CommandClient;
use crate::protocol::{
    BAUD_DEFAULT, BAUD_EEPROM_UNLOCK, CMD_JUMP_APP, CMD_JUMP_BOOTLOADER, CMD_LOCK_APP,
    CMD_LOCK_BOOT, CMD_LOCK_EEPROM, CMD_SOFTWARE_RESET, CMD_UNLOCK_APP, CMD_UNLOCK_BOOT,
    CMD_UNLOCK_EEPROM, Envelope, UNLOCK_PAYLOAD,
};
use crate::transport::SerialTransport;

/// Protectable memory region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockRegion {
    Eeprom,
    App,
    Boot,
}

impl LockRegion {
    pub fn lock_code(&self) -> [u8; 2] {
        match self {
            LockRegion::Eeprom => CMD_LOCK_EEPROM,
            LockRegion::App => CMD_LOCK_APP,
            LockRegion::Boot => CMD_LOCK_BOOT,
        }
    }

    pub fn unlock_code(&self) -> [u8; 2] {
        match self {
            LockRegion::Eeprom => CMD_UNLOCK_EEPROM,
            LockRegion::App => CMD_UNLOCK_APP,
            LockRegion::Boot => CMD_UNLOCK_BOOT,
        }
    }

    /// Link speed the unlock command must be sent at.
    pub fn unlock_baud(&self) -> u32 {
        match self {
            LockRegion::Eeprom => BAUD_EEPROM_UNLOCK,
            _ => BAUD_DEFAULT,
        }
    }
}

impl fmt::Display for LockRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockRegion::Eeprom => write!(f, "eeprom"),
            LockRegion::App => write!(f, "app"),
            LockRegion::Boot => write!(f, "boot"),
        }
    }
}

impl FromStr for LockRegion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "eeprom" => Ok(LockRegion::Eeprom),
            "app" => Ok(LockRegion::App),
            "boot" => Ok(LockRegion::Boot),
            _ => Err(format!("unknown region '{s}' (expected eeprom, app or boot)")),
        }
    }
}

impl<T: SerialTransport> CommandClient<T> {
    #[instrument(skip(self))]
    pub fn restart(&mut self) -> Result<(), CommandError> {
        self.exchange(&Envelope::empty(CMD_SOFTWARE_RESET))?;
        info!("Device restarted");
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn jump_to_bootloader(&mut self) -> Result<(), CommandError> {
        self.exchange(&Envelope::empty(CMD_JUMP_BOOTLOADER))?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn jump_to_app(&mut self) -> Result<(), CommandError> {
        self.exchange(&Envelope::empty(CMD_JUMP_APP))?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn lock(&mut self, region: LockRegion) -> Result<(), CommandError> {
        self.transport_mut().set_baud_rate(BAUD_DEFAULT)?;
        self.set_quiet()?;
        self.transport_mut().clear_input()?;
        self.exchange(&Envelope::empty(region.lock_code()))?;
        self.transport_mut().clear_input()?;
        info!(%region, "Region locked");
        Ok(())
    }

    /// Unlock `region`. The EEPROM unlock is only accepted at 115200 baud,
    /// so the link is switched before anything is sent.
    #[instrument(skip(self))]
    pub fn unlock(&mut self, region: LockRegion) -> Result<(), CommandError> {
        self.transport_mut().set_baud_rate(region.unlock_baud())?;
        self.set_quiet()?;
        self.transport_mut().clear_input()?;
        let request = Envelope::new(region.unlock_code(), UNLOCK_PAYLOAD.to_vec())?;
        self.exchange(&request)?;
        self.transport_mut().clear_input()?;
        info!(%region, "Region unlocked");
        Ok(())
    }
}
