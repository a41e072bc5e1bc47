//! Transport wrapper that emits packet events.

use std::sync::Arc;

use super::traits::{SerialTransport, TransportError};
use crate::events::{ImuEvent, ImuObserver, PacketDirection};
use crate::protocol::{PREAMBLE, CommandCode};

/// Bytes of each packet kept in the event preview.
const PREVIEW_LEN: usize = 32;

pub struct ObservableTransport<T: SerialTransport, O: ImuObserver> {
    inner: T,
    observer: Arc<O>,
}

impl<T: SerialTransport, O: ImuObserver> ObservableTransport<T, O> {
    pub fn new(inner: T, observer: Arc<O>) -> Self {
        Self { inner, observer }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    fn emit(&self, direction: PacketDirection, data: &[u8]) {
        let code = if data.starts_with(&PREAMBLE) {
            CommandCode::from_bytes(&data[PREAMBLE.len()..]).map(|c| c.as_ascii())
        } else {
            None
        };
        self.observer.on_event(&ImuEvent::Packet {
            direction,
            code,
            length: data.len(),
            data: Some(data.iter().take(PREVIEW_LEN).copied().collect()),
        });
    }
}

impl<T: SerialTransport, O: ImuObserver> SerialTransport for ObservableTransport<T, O> {
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let res = self.inner.write(data);
        if res.is_ok() {
            self.emit(PacketDirection::Tx, data);
        }
        res
    }

    fn read(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        let res = self.inner.read(max_len);
        if let Ok(data) = &res
            && !data.is_empty()
        {
            self.emit(PacketDirection::Rx, data);
        }
        res
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        self.inner.clear_input()
    }

    fn clear_output(&mut self) -> Result<(), TransportError> {
        self.inner.clear_output()
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<(), TransportError> {
        self.inner.set_baud_rate(baud)?;
        self.observer.on_event(&ImuEvent::Log {
            level: crate::events::LogLevel::Debug,
            message: format!("Link speed set to {baud}"),
        });
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.inner.baud_rate()
    }

    fn port_name(&self) -> &str {
        self.inner.port_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::testing::RecordingObserver;
    use crate::protocol::{CMD_JUMP_APP, Envelope};
    use crate::transport::MockTransport;

    #[test]
    fn test_emits_tx_and_rx() {
        let mock = MockTransport::new();
        let observer = Arc::new(RecordingObserver::default());
        let mut t = ObservableTransport::new(mock.clone(), observer.clone());

        mock.queue_reply(&Envelope::empty(CMD_JUMP_APP).to_bytes());
        t.write(&Envelope::empty(CMD_JUMP_APP).to_bytes()).unwrap();
        t.read(64).unwrap();
        t.read(64).unwrap();

        let events = observer.take();
        assert_eq!(events.len(), 2);
        match &events[0] {
            ImuEvent::Packet { direction, code, length, .. } => {
                assert_eq!(*direction, PacketDirection::Tx);
                assert_eq!(code.as_deref(), Some("JA"));
                assert_eq!(*length, 7);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(
            events[1],
            ImuEvent::Packet { direction: PacketDirection::Rx, .. }
        ));
    }
}
