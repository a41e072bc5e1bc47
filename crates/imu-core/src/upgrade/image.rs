//! Firmware image padding and block planning.

use std::path::Path;

use tracing::info;

use super::UpgradeError;
use crate::protocol::{IMAGE_ALIGNMENT, MAX_BLOCK_LEN};

/// Application image padded with zeros to a 16-byte boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    data: Vec<u8>,
    original_len: usize,
}

impl FirmwareImage {
    pub fn from_bytes(mut data: Vec<u8>) -> Result<Self, UpgradeError> {
        if data.is_empty() {
            return Err(UpgradeError::EmptyImage);
        }
        if u32::try_from(data.len()).is_err() {
            return Err(UpgradeError::ImageTooLarge(data.len()));
        }
        let original_len = data.len();
        let rem = original_len % IMAGE_ALIGNMENT;
        if rem != 0 {
            data.resize(original_len + IMAGE_ALIGNMENT - rem, 0);
        }
        Ok(Self { data, original_len })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, UpgradeError> {
        let data = std::fs::read(path.as_ref())?;
        info!(path = %path.as_ref().display(), bytes = data.len(), "Loaded firmware image");
        Self::from_bytes(data)
    }

    /// Padded length.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Length before padding.
    pub fn original_len(&self) -> usize {
        self.original_len
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Blocks in write order.
    pub fn blocks(&self) -> impl Iterator<Item = Block<'_>> {
        let mut cursor = BlockCursor::new(self.data.len());
        std::iter::from_fn(move || cursor.next_block(&self.data))
    }
}

/// One WA transfer unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block<'a> {
    pub offset: usize,
    pub data: &'a [u8],
}

/// Position in the block sequence, kept apart from the image so a
/// long-running upgrade can advance one block at a time.
#[derive(Debug, Default, Clone)]
pub struct BlockCursor {
    /// Current byte offset.
    pub offset: usize,
    /// Blocks handed out.
    pub current: usize,
    /// Total number of blocks.
    pub total: usize,
    pub data_size: usize,
}

impl BlockCursor {
    pub fn new(data_size: usize) -> Self {
        Self {
            offset: 0,
            current: 0,
            total: data_size.div_ceil(MAX_BLOCK_LEN),
            data_size,
        }
    }

    /// Next block from data, advancing state.
    pub fn next_block<'a>(&mut self, data: &'a [u8]) -> Option<Block<'a>> {
        let end = self.data_size.min(data.len());
        if self.offset >= end {
            return None;
        }
        let len = (end - self.offset).min(MAX_BLOCK_LEN);
        let block = Block {
            offset: self.offset,
            data: &data[self.offset..self.offset + len],
        };
        self.offset += len;
        self.current += 1;
        Some(block)
    }

    pub fn is_done(&self) -> bool {
        self.current >= self.total
    }
}
