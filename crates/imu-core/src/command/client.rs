//! Request/response exchange over a serial transport.

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, instrument, trace};

use super::CommandError;
use crate::packet::deframer::find;
use crate::protocol::{
    CMD_GET_PACKET, CommandCode, ENVELOPE_OVERHEAD, Envelope, EnvelopeError, PREAMBLE, QUIET_PAYLOAD,
    RESPONSE_TIMEOUT, SERIAL_READ_CHUNK,
};
use crate::transport::SerialTransport;

const IDLE_POLL: Duration = Duration::from_millis(1);
const QUIET_SETTLE: Duration = Duration::from_millis(100);

/// Header a response to `request` starts with.
///
/// Responses echo the request code, except `GP`: the device answers with
/// the code of the packet that was asked for, which is the first two
/// payload bytes of the request.
pub fn response_header(request: &[u8]) -> [u8; 4] {
    match request {
        [p0, p1, c0, c1, _, a0, a1, ..] if [*c0, *c1] == CMD_GET_PACKET => [*p0, *p1, *a0, *a1],
        [p0, p1, c0, c1, ..] => [*p0, *p1, *c0, *c1],
        _ => [PREAMBLE[0], PREAMBLE[1], 0, 0],
    }
}

/// The complete response starting at the first `header` in `buffer`.
///
/// Size comes from the length byte following the header. `None` until the
/// header and every declared byte are present.
pub fn locate_response<'a>(buffer: &'a [u8], header: &[u8; 4]) -> Option<&'a [u8]> {
    let pos = find(buffer, header)?;
    let declared = *buffer.get(pos + header.len())? as usize;
    buffer.get(pos..pos + declared + ENVELOPE_OVERHEAD)
}

/// Synchronous command client owning the link for the duration of its use.
pub struct CommandClient<T: SerialTransport> {
    transport: T,
    timeout: Duration,
    quiet_settle: Duration,
    verify_crc: bool,
    rate_setting: Option<u8>,
}

impl<T: SerialTransport> CommandClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            timeout: RESPONSE_TIMEOUT,
            quiet_settle: QUIET_SETTLE,
            verify_crc: false,
            rate_setting: None,
        }
    }

    /// Response timeout for every exchange.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Pause before and after the quiet-mode command.
    pub fn with_quiet_settle(mut self, settle: Duration) -> Self {
        self.quiet_settle = settle;
        self
    }

    /// Reject responses whose trailing CRC does not match their content.
    /// Off by default.
    pub fn verify_response_crc(mut self, verify: bool) -> Self {
        self.verify_crc = verify;
        self
    }

    /// Packet-rate code to report for the rate field in GF results. A
    /// quiet unit reads back zero there.
    pub fn with_rate_setting(mut self, code: u8) -> Self {
        self.rate_setting = Some(code);
        self
    }

    pub fn rate_setting(&self) -> Option<u8> {
        self.rate_setting
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Write `request` and wait for its correlated response.
    ///
    /// No retry here; a timeout is returned to the caller.
    #[instrument(skip(self, request), fields(code = %request.code))]
    pub fn exchange(&mut self, request: &Envelope) -> Result<Envelope, CommandError> {
        let bytes = request.to_bytes();
        let header = response_header(&bytes);
        self.transport.write(&bytes)?;
        trace!(len = bytes.len(), "Request sent");

        let start = Instant::now();
        let mut data = Vec::new();
        loop {
            let chunk = self.transport.read(SERIAL_READ_CHUNK)?;
            let idle = chunk.is_empty();
            data.extend(chunk);

            if let Some(raw) = locate_response(&data, &header) {
                let response = Envelope::from_bytes(raw)?;
                if self.verify_crc
                    && let Err(EnvelopeError::CrcMismatch { expected, actual }) = response.verify()
                {
                    return Err(CommandError::CrcMismatch {
                        code: response.code,
                        expected,
                        actual,
                    });
                }
                debug!(response = %response.code, len = response.payload.len(), "Response received");
                return Ok(response);
            }

            if start.elapsed() >= self.timeout {
                return Err(CommandError::ResponseTimeout {
                    code: request.code,
                    timeout: self.timeout,
                });
            }
            if idle {
                thread::sleep(IDLE_POLL);
            }
        }
    }

    /// Write an envelope without waiting for anything.
    pub fn send(&mut self, request: &Envelope) -> Result<(), CommandError> {
        self.transport.write(&request.to_bytes())?;
        Ok(())
    }

    /// Read a fixed-size acknowledgement, returning what arrived in `window`.
    pub fn read_ack(&mut self, len: usize, window: Duration) -> Result<Vec<u8>, CommandError> {
        Ok(self.transport.read_exact_within(len, window)?)
    }

    /// Read a `len`-byte acknowledgement and require it to be tagged `code`.
    pub fn expect_ack(
        &mut self,
        code: [u8; 2],
        len: usize,
        window: Duration,
    ) -> Result<Vec<u8>, CommandError> {
        let ack = self.read_ack(len, window)?;
        if !is_ack(&ack, len, code) {
            return Err(CommandError::UnexpectedAck {
                expected: CommandCode::new(code),
                actual: ack,
            });
        }
        Ok(ack)
    }

    /// Put the device in quiet mode so no unsolicited packets interleave
    /// with command responses.
    #[instrument(skip(self))]
    pub fn set_quiet(&mut self) -> Result<(), CommandError> {
        thread::sleep(self.quiet_settle);
        self.transport.clear_input()?;
        let request = Envelope::new(crate::protocol::CMD_SET_FIELDS, QUIET_PAYLOAD.to_vec())?;
        self.exchange(&request)?;
        thread::sleep(self.quiet_settle);
        self.transport.clear_input()?;
        Ok(())
    }
}

/// `ack` is a complete `len`-byte packet tagged `code`.
fn is_ack(ack: &[u8], len: usize, code: [u8; 2]) -> bool {
    ack.len() == len
        && ack.starts_with(&PREAMBLE)
        && CommandCode::from_bytes(&ack[PREAMBLE.len()..]).is_some_and(|c| c.matches(code))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::protocol::{CMD_JUMP_APP, CMD_SOFTWARE_RESET, PACKET_ID};
    use crate::transport::MockTransport;

    pub(crate) fn client(mock: &MockTransport) -> CommandClient<MockTransport> {
        CommandClient::new(mock.clone())
            .with_timeout(Duration::from_millis(50))
            .with_quiet_settle(Duration::ZERO)
    }

    pub(crate) fn reply(code: [u8; 2], payload: &[u8]) -> Vec<u8> {
        Envelope::new(code, payload.to_vec()).unwrap().to_bytes()
    }

    #[test]
    fn test_header_echoes_code() {
        let request = Envelope::empty(CMD_SOFTWARE_RESET).to_bytes();
        assert_eq!(response_header(&request), [0x55, 0x55, b'S', b'R']);
    }

    #[test]
    fn test_get_packet_header_uses_requested_code() {
        let request = Envelope::new(CMD_GET_PACKET, PACKET_ID.to_vec())
            .unwrap()
            .to_bytes();
        assert_eq!(response_header(&request), [0x55, 0x55, b'I', b'D']);

        // Bytes 2..4 of the response differ from GP; bytes 5..7 of the
        // request pick it out.
        let response = reply(PACKET_ID, &[0, 0, 0, 7, b'x']);
        let mut buffer = vec![0x00, 0x55];
        buffer.extend_from_slice(&response);
        let header = response_header(&request);
        assert_eq!(locate_response(&buffer, &header), Some(response.as_slice()));
    }

    #[test]
    fn test_locate_waits_for_declared_length() {
        let response = reply(CMD_JUMP_APP, &[1, 2, 3]);
        let header = [0x55, 0x55, b'J', b'A'];
        assert!(locate_response(&response[..4], &header).is_none());
        assert!(locate_response(&response[..9], &header).is_none());
        assert_eq!(locate_response(&response, &header), Some(response.as_slice()));
    }

    #[test]
    fn test_exchange_skips_noise() {
        let mock = MockTransport::new();
        let mut noisy = vec![0x55, 0x55, b'S', b'1', 0x01];
        noisy.extend(reply(CMD_SOFTWARE_RESET, &[]));
        mock.queue_reply(&noisy);

        let response = client(&mock)
            .exchange(&Envelope::empty(CMD_SOFTWARE_RESET))
            .unwrap();
        assert!(response.code.matches(CMD_SOFTWARE_RESET));
        assert!(response.payload.is_empty());
    }

    #[test]
    fn test_exchange_times_out() {
        let mock = MockTransport::new();
        mock.queue_silence();
        let err = client(&mock)
            .exchange(&Envelope::empty(CMD_SOFTWARE_RESET))
            .unwrap_err();
        assert!(matches!(err, CommandError::ResponseTimeout { .. }));
    }

    #[test]
    fn test_crc_checked_only_when_enabled() {
        let mut bad = reply(CMD_JUMP_APP, &[]);
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;

        let mock = MockTransport::new();
        mock.queue_reply(&bad);
        assert!(client(&mock).exchange(&Envelope::empty(CMD_JUMP_APP)).is_ok());

        mock.queue_reply(&bad);
        let err = client(&mock)
            .verify_response_crc(true)
            .exchange(&Envelope::empty(CMD_JUMP_APP))
            .unwrap_err();
        assert!(matches!(err, CommandError::CrcMismatch { .. }));
    }

    #[test]
    fn test_expect_ack_checks_tag_and_length() {
        let mock = MockTransport::new();
        let mut c = client(&mock);
        let window = Duration::from_millis(20);

        mock.feed(&[0x55, 0x55, b'J', b'I', 0x00]);
        assert_eq!(c.expect_ack(*b"JI", 5, window).unwrap(), [0x55, 0x55, b'J', b'I', 0x00]);

        mock.feed(&[0x55, 0x55, b'J', b'A', 0x00]);
        match c.expect_ack(*b"JI", 5, window) {
            Err(CommandError::UnexpectedAck { expected, actual }) => {
                assert!(expected.matches(*b"JI"));
                assert_eq!(actual, [0x55, 0x55, b'J', b'A', 0x00]);
            }
            other => panic!("expected UnexpectedAck, got {other:?}"),
        }

        mock.feed(&[0x55, 0x55]);
        assert!(matches!(
            c.expect_ack(*b"JI", 5, window),
            Err(CommandError::UnexpectedAck { ref actual, .. }) if actual.len() == 2
        ));
    }

    #[test]
    fn test_set_quiet_sends_fixed_payload() {
        let mock = MockTransport::new();
        mock.feed(&[0x55, 0x55, b'S', b'1']);
        mock.queue_reply(&reply(crate::protocol::CMD_SET_FIELDS, &[1, 0, 1]));
        client(&mock).set_quiet().unwrap();

        let writes = mock.get_writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(&writes[0][..10], &[0x55, 0x55, b'S', b'F', 0x05, 0x01, 0x00, 0x01, 0x00, 0x00]);
        assert_eq!(mock.pending_rx(), 0);
    }
}
