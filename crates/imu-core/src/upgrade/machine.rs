//! Upgrade state tracking.

use std::fmt;

use super::image::FirmwareImage;

/// Where an upgrade currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpgradeState {
    #[default]
    Idle,
    QuietSet,
    BootloaderEntered,
    /// Next block goes to this offset.
    Writing { offset: usize },
    Complete,
    AppResumed,
    Failed,
}

impl UpgradeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UpgradeState::AppResumed | UpgradeState::Failed)
    }
}

impl fmt::Display for UpgradeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpgradeState::Idle => write!(f, "IDLE"),
            UpgradeState::QuietSet => write!(f, "QUIET_SET"),
            UpgradeState::BootloaderEntered => write!(f, "BOOTLOADER_ENTERED"),
            UpgradeState::Writing { offset } => write!(f, "WRITING@{offset}"),
            UpgradeState::Complete => write!(f, "COMPLETE"),
            UpgradeState::AppResumed => write!(f, "APP_RESUMED"),
            UpgradeState::Failed => write!(f, "FAILED"),
        }
    }
}

/// One upgrade invocation: the padded image and how much of it is on the device.
#[derive(Debug)]
pub struct UpgradeSession {
    pub image: FirmwareImage,
    pub total_len: usize,
    pub written_len: usize,
    pub state: UpgradeState,
}

impl UpgradeSession {
    pub fn new(image: FirmwareImage) -> Self {
        let total_len = image.len();
        Self {
            image,
            total_len,
            written_len: 0,
            state: UpgradeState::Idle,
        }
    }

    /// Transition to a new state, returning the previous one.
    pub fn goto_state(&mut self, new_state: UpgradeState) -> UpgradeState {
        tracing::info!(from = %self.state, to = %new_state, "State transition");
        std::mem::replace(&mut self.state, new_state)
    }

    /// Share of the image written, 0-100.
    pub fn progress(&self) -> f64 {
        if self.total_len == 0 {
            return 100.0;
        }
        self.written_len as f64 / self.total_len as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_and_transitions() {
        let image = FirmwareImage::from_bytes(vec![1u8; 40]).unwrap();
        let mut session = UpgradeSession::new(image);
        assert_eq!(session.total_len, 48);
        assert_eq!(session.progress(), 0.0);

        let prev = session.goto_state(UpgradeState::QuietSet);
        assert_eq!(prev, UpgradeState::Idle);
        session.written_len = 24;
        assert_eq!(session.progress(), 50.0);
        assert!(!session.state.is_terminal());
        session.goto_state(UpgradeState::Failed);
        assert!(session.state.is_terminal());
        assert_eq!(UpgradeState::Writing { offset: 192 }.to_string(), "WRITING@192");
    }
}
