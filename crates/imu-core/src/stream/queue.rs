//! Bounded frame queue between the synchronizer and a consumer.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::warn;

use crate::packet::RawFrame;
use crate::protocol::QUEUE_SECONDS;

/// Ring buffer of validated frames.
///
/// A push on a full queue evicts the oldest frame instead of blocking.
/// Evictions are counted, never reported as errors.
#[derive(Debug)]
pub struct StreamQueue {
    frames: Mutex<VecDeque<RawFrame>>,
    capacity: usize,
    evicted: AtomicU64,
}

impl StreamQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity,
            evicted: AtomicU64::new(0),
        }
    }

    /// Queue sized for `odr` Hz of output.
    pub fn for_output_rate(odr: u32) -> Self {
        Self::new(odr as usize * QUEUE_SECONDS)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn push(&self, frame: RawFrame) {
        let mut frames = self.lock();
        if frames.len() >= self.capacity {
            frames.pop_front();
            let total = self.evicted.fetch_add(1, Ordering::Relaxed) + 1;
            if total.is_power_of_two() {
                warn!(evicted = total, capacity = self.capacity, "Stream queue full, dropping oldest frames");
            }
        }
        frames.push_back(frame);
    }

    pub fn pop(&self) -> Option<RawFrame> {
        self.lock().pop_front()
    }

    /// Take every queued frame at once.
    pub fn drain(&self) -> Vec<RawFrame> {
        self.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Frames dropped because the queue was full.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<RawFrame>> {
        // A panicked holder cannot leave the deque half-updated.
        self.frames
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{PacketFormat, PacketKind};

    fn frame(tag: u8) -> RawFrame {
        let format = PacketFormat::new(PacketKind::S1);
        let mut payload = vec![0u8; format.payload_len()];
        payload[0] = tag;
        RawFrame::new(&format, format.encode(&payload).unwrap()).unwrap()
    }

    fn tag_of(frame: &RawFrame) -> u8 {
        frame.as_bytes()[5]
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let queue = StreamQueue::new(4);
        for tag in 0..5 {
            queue.push(frame(tag));
        }
        assert_eq!(queue.len(), 4);
        assert_eq!(queue.evicted(), 1);

        let tags: Vec<u8> = queue.drain().iter().map(tag_of).collect();
        assert_eq!(tags, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_capacity_from_output_rate() {
        assert_eq!(StreamQueue::for_output_rate(100).capacity(), 100_000);
    }

    #[test]
    fn test_fifo_and_clear() {
        let queue = StreamQueue::new(8);
        queue.push(frame(7));
        queue.push(frame(8));
        assert_eq!(queue.pop().map(|f| tag_of(&f)), Some(7));
        queue.clear();
        assert!(queue.is_empty());
        assert!(queue.pop().is_none());
    }
}
