//! Upgrade driver.
//!
//! Sequence: quiet mode, bootloader entry at 230400 baud, WA block writes
//! at 57600 baud, then JA to start the new application. Every step is
//! fatal on failure; nothing is retried and a failed block leaves the
//! device in its bootloader.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use super::UpgradeError;
use super::image::{BlockCursor, FirmwareImage};
use super::machine::{UpgradeSession, UpgradeState};
use crate::command::{CommandClient, CommandError};
use crate::events::{ImuEvent, ImuObserver, NullObserver};
use crate::protocol::{
    BAUD_BLOCK_WRITE, BAUD_DEFAULT, BLOCK_ACK_LEN, CMD_JUMP_APP, CMD_JUMP_BOOTLOADER,
    CMD_WRITE_APP, Envelope, SHORT_ACK_LEN,
};
use crate::transport::SerialTransport;

/// Delays the bootloader needs between steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpgradeTiming {
    /// Before and after the quiet-mode command.
    pub quiet_settle: Duration,
    /// Before JI, after JI and after its acknowledgement.
    pub bootloader_settle: Duration,
    /// After the block at offset 0, while the device erases flash.
    pub erase_wait: Duration,
    /// After every other block.
    pub block_wait: Duration,
    /// Before JA.
    pub resume_wait: Duration,
    /// How long to wait for acknowledgement bytes once the wait is over.
    pub ack_window: Duration,
}

impl Default for UpgradeTiming {
    fn default() -> Self {
        Self {
            quiet_settle: Duration::from_millis(100),
            bootloader_settle: Duration::from_secs(2),
            erase_wait: Duration::from_secs(26),
            block_wait: Duration::from_millis(100),
            resume_wait: Duration::from_secs(1),
            ack_window: Duration::from_millis(100),
        }
    }
}

impl UpgradeTiming {
    /// No delays; for simulated devices.
    pub fn immediate() -> Self {
        Self {
            quiet_settle: Duration::ZERO,
            bootloader_settle: Duration::ZERO,
            erase_wait: Duration::ZERO,
            block_wait: Duration::ZERO,
            resume_wait: Duration::ZERO,
            ack_window: Duration::from_millis(20),
        }
    }
}

/// Configures and starts an upgrade.
pub struct Upgrader<T: SerialTransport> {
    client: CommandClient<T>,
    timing: UpgradeTiming,
    observer: Arc<dyn ImuObserver>,
}

impl<T: SerialTransport> Upgrader<T> {
    pub fn new(client: CommandClient<T>) -> Self {
        Self {
            client,
            timing: UpgradeTiming::default(),
            observer: Arc::new(NullObserver),
        }
    }

    pub fn with_timing(mut self, timing: UpgradeTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ImuObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Lazy upgrade of `image`. Nothing is sent until the first `next()`.
    pub fn run(self, image: FirmwareImage) -> UpgradeRun<T> {
        let client = self.client.with_quiet_settle(self.timing.quiet_settle);
        let cursor = BlockCursor::new(image.len());
        UpgradeRun {
            client,
            session: UpgradeSession::new(image),
            cursor,
            timing: self.timing,
            observer: self.observer,
        }
    }
}

/// Upgrade in progress: yields the written percentage after every block.
///
/// The final item is 100 once the application has been restarted. After
/// an error the iterator is exhausted; an upgrade cannot be resumed.
pub struct UpgradeRun<T: SerialTransport> {
    client: CommandClient<T>,
    session: UpgradeSession,
    cursor: BlockCursor,
    timing: UpgradeTiming,
    observer: Arc<dyn ImuObserver>,
}

impl<T: SerialTransport> UpgradeRun<T> {
    pub fn session(&self) -> &UpgradeSession {
        &self.session
    }

    pub fn state(&self) -> UpgradeState {
        self.session.state
    }

    pub fn into_client(self) -> CommandClient<T> {
        self.client
    }

    fn goto(&mut self, state: UpgradeState) {
        let from = self.session.goto_state(state);
        self.observer.on_event(&ImuEvent::StateChanged { from, to: state });
    }

    #[instrument(skip(self))]
    fn prepare(&mut self) -> Result<(), UpgradeError> {
        self.client.set_quiet().map_err(UpgradeError::QuietFailed)?;
        self.goto(UpgradeState::QuietSet);

        self.enter_bootloader()?;
        self.goto(UpgradeState::BootloaderEntered);

        self.client.transport_mut().set_baud_rate(BAUD_BLOCK_WRITE)?;
        self.goto(UpgradeState::Writing { offset: 0 });
        Ok(())
    }

    fn enter_bootloader(&mut self) -> Result<(), UpgradeError> {
        let failed = |e: &dyn std::fmt::Display| UpgradeError::BootloaderEntryFailed(e.to_string());

        self.client
            .transport_mut()
            .set_baud_rate(BAUD_DEFAULT)
            .map_err(|e| failed(&e))?;
        self.client.set_quiet().map_err(|e| failed(&e))?;
        thread::sleep(self.timing.bootloader_settle);

        self.client
            .send(&Envelope::empty(CMD_JUMP_BOOTLOADER))
            .map_err(|e| failed(&e))?;
        thread::sleep(self.timing.bootloader_settle);

        self.client
            .expect_ack(CMD_JUMP_BOOTLOADER, SHORT_ACK_LEN, self.timing.ack_window)
            .map_err(|e| failed(&e))?;
        thread::sleep(self.timing.bootloader_settle);
        self.client.transport_mut().clear_input().map_err(|e| failed(&e))?;
        info!("Bootloader entered");
        Ok(())
    }

    fn write_block(&mut self, offset: usize, data: &[u8]) -> Result<(), UpgradeError> {
        let failed = |reason: String| UpgradeError::BlockWriteFailed { offset, reason };

        let mut payload = Vec::with_capacity(data.len() + 5);
        payload.extend_from_slice(&(offset as u32).to_be_bytes());
        payload.push(data.len() as u8);
        payload.extend_from_slice(data);
        let request = Envelope::new(CMD_WRITE_APP, payload).map_err(|e| failed(e.to_string()))?;

        self.client.send(&request).map_err(|e| failed(e.to_string()))?;
        thread::sleep(if offset == 0 {
            self.timing.erase_wait
        } else {
            self.timing.block_wait
        });

        self.client
            .expect_ack(CMD_WRITE_APP, BLOCK_ACK_LEN, self.timing.ack_window)
            .map_err(|e| failed(e.to_string()))?;
        debug!(offset, len = data.len(), "Block written");
        Ok(())
    }

    fn resume_app(&mut self) -> Result<(), UpgradeError> {
        thread::sleep(self.timing.resume_wait);
        self.client.send(&Envelope::empty(CMD_JUMP_APP))?;
        match self.client.expect_ack(CMD_JUMP_APP, SHORT_ACK_LEN, self.timing.ack_window) {
            Ok(_) => info!("Application started"),
            Err(CommandError::UnexpectedAck { actual, .. }) => {
                warn!(ack = ?actual, "No JA acknowledgement, the device may need a power cycle")
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    fn step(&mut self) -> Result<f64, UpgradeError> {
        if self.session.state == UpgradeState::Idle {
            info!(
                bytes = self.session.total_len,
                blocks = self.cursor.total,
                "Starting firmware upgrade"
            );
            self.prepare()?;
        }

        let data = self.session.image.as_bytes();
        let Some(block) = self.cursor.next_block(data) else {
            return Ok(self.session.progress());
        };
        let (offset, chunk) = (block.offset, block.data.to_vec());
        self.write_block(offset, &chunk)?;

        self.session.written_len = offset + chunk.len();
        self.observer.on_event(&ImuEvent::Progress {
            operation: "upgrade".to_string(),
            current: self.session.written_len as u64,
            total: self.session.total_len as u64,
        });

        if self.cursor.is_done() {
            self.goto(UpgradeState::Complete);
            self.resume_app()?;
            self.goto(UpgradeState::AppResumed);
            self.observer.on_event(&ImuEvent::Complete);
        } else {
            self.goto(UpgradeState::Writing {
                offset: self.session.written_len,
            });
        }
        Ok(self.session.progress())
    }
}

impl<T: SerialTransport> Iterator for UpgradeRun<T> {
    type Item = Result<f64, UpgradeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.session.state.is_terminal() {
            return None;
        }
        match self.step() {
            Ok(progress) => Some(Ok(progress)),
            Err(e) => {
                warn!(error = %e, state = %self.session.state, written = self.session.written_len, "Upgrade aborted");
                self.observer.on_event(&ImuEvent::Error {
                    stage: self.session.state.to_string(),
                    message: e.to_string(),
                });
                self.goto(UpgradeState::Failed);
                Some(Err(e))
            }
        }
    }
}
