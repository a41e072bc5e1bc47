//! Mock serial transport for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::traits::{SerialTransport, TransportError};
use crate::protocol::BAUD_DEFAULT;

/// Scripted device double.
///
/// Stream bytes can be injected directly with [`MockTransport::feed`];
/// replies queued with [`MockTransport::queue_reply`] become readable only
/// after the next write, like a device answering a command. Clones share
/// state, so a test can keep a handle while the transport is moved into a
/// worker thread.
#[derive(Clone)]
pub struct MockTransport {
    /// Bytes waiting to be read.
    rx: Arc<Mutex<VecDeque<u8>>>,
    /// One reply released per write.
    replies: Arc<Mutex<VecDeque<Vec<u8>>>>,
    /// Captured writes with the link speed in effect.
    write_log: Arc<Mutex<Vec<(u32, Vec<u8>)>>>,
    baud_log: Arc<Mutex<Vec<u32>>>,
    baud: Arc<Mutex<u32>>,
    connected: Arc<Mutex<bool>>,
    /// Upper bound on bytes returned per read.
    read_chunk: Arc<Mutex<Option<usize>>>,
    port: String,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            rx: Arc::new(Mutex::new(VecDeque::new())),
            replies: Arc::new(Mutex::new(VecDeque::new())),
            write_log: Arc::new(Mutex::new(Vec::new())),
            baud_log: Arc::new(Mutex::new(Vec::new())),
            baud: Arc::new(Mutex::new(BAUD_DEFAULT)),
            connected: Arc::new(Mutex::new(true)),
            read_chunk: Arc::new(Mutex::new(None)),
            port: "mock".to_string(),
        }
    }

    /// Make `bytes` readable immediately.
    pub fn feed(&self, bytes: &[u8]) {
        self.rx.lock().unwrap().extend(bytes.iter().copied());
    }

    /// Queue a reply released by the next write.
    pub fn queue_reply(&self, bytes: &[u8]) {
        self.replies.lock().unwrap().push_back(bytes.to_vec());
    }

    /// Queue a write that gets no reply.
    pub fn queue_silence(&self) {
        self.queue_reply(&[]);
    }

    /// Limit each read to `n` bytes to simulate a fragmented stream.
    pub fn set_read_chunk(&self, n: usize) {
        *self.read_chunk.lock().unwrap() = Some(n.max(1));
    }

    /// Get all captured writes.
    pub fn get_writes(&self) -> Vec<Vec<u8>> {
        self.write_log
            .lock()
            .unwrap()
            .iter()
            .map(|(_, w)| w.clone())
            .collect()
    }

    /// Captured writes paired with the baud rate they were sent at.
    pub fn writes_with_baud(&self) -> Vec<(u32, Vec<u8>)> {
        self.write_log.lock().unwrap().clone()
    }

    /// Every baud rate requested, in order.
    pub fn baud_changes(&self) -> Vec<u32> {
        self.baud_log.lock().unwrap().clone()
    }

    /// Bytes still unread.
    pub fn pending_rx(&self) -> usize {
        self.rx.lock().unwrap().len()
    }

    /// Simulate device disconnect.
    pub fn disconnect(&self) {
        *self.connected.lock().unwrap() = false;
    }

    /// Simulate device reconnect.
    pub fn reconnect(&self) {
        *self.connected.lock().unwrap() = true;
    }

    fn check_connected(&self) -> Result<(), TransportError> {
        if *self.connected.lock().unwrap() {
            Ok(())
        } else {
            Err(TransportError::Disconnected)
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialTransport for MockTransport {
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        self.check_connected()?;
        let baud = *self.baud.lock().unwrap();
        self.write_log.lock().unwrap().push((baud, data.to_vec()));
        if let Some(reply) = self.replies.lock().unwrap().pop_front() {
            self.feed(&reply);
        }
        Ok(data.len())
    }

    fn read(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        self.check_connected()?;
        let limit = self.read_chunk.lock().unwrap().unwrap_or(usize::MAX);
        let mut rx = self.rx.lock().unwrap();
        let n = rx.len().min(max_len).min(limit);
        Ok(rx.drain(..n).collect())
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        self.check_connected()?;
        self.rx.lock().unwrap().clear();
        Ok(())
    }

    fn clear_output(&mut self) -> Result<(), TransportError> {
        self.check_connected()
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<(), TransportError> {
        self.check_connected()?;
        *self.baud.lock().unwrap() = baud;
        self.baud_log.lock().unwrap().push(baud);
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        *self.baud.lock().unwrap()
    }

    fn port_name(&self) -> &str {
        &self.port
    }
}
