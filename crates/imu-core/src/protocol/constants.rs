use std::time::Duration;

/// Envelope preamble shared by commands, responses and `55 55`-framed packets.
pub const PREAMBLE: [u8; 2] = [0x55, 0x55];

/// Preamble + code + length byte.
pub const ENVELOPE_HEADER_LEN: usize = 5;
pub const ENVELOPE_CRC_LEN: usize = 2;
/// Header + CRC, i.e. everything but the payload.
pub const ENVELOPE_OVERHEAD: usize = ENVELOPE_HEADER_LEN + ENVELOPE_CRC_LEN;

// Command codes
pub const CMD_GET_PACKET: [u8; 2] = *b"GP";
pub const CMD_GET_FIELDS: [u8; 2] = *b"GF";
pub const CMD_READ_FIELDS: [u8; 2] = *b"RF";
pub const CMD_SET_FIELDS: [u8; 2] = *b"SF";
pub const CMD_WRITE_FIELDS: [u8; 2] = *b"WF";
pub const CMD_SOFTWARE_RESET: [u8; 2] = *b"SR";
pub const CMD_JUMP_BOOTLOADER: [u8; 2] = *b"JI";
pub const CMD_JUMP_APP: [u8; 2] = *b"JA";
pub const CMD_WRITE_APP: [u8; 2] = *b"WA";

// Region lock/unlock codes
pub const CMD_LOCK_EEPROM: [u8; 2] = *b"LE";
pub const CMD_LOCK_APP: [u8; 2] = *b"LA";
pub const CMD_LOCK_BOOT: [u8; 2] = *b"LB";
pub const CMD_UNLOCK_EEPROM: [u8; 2] = *b"UE";
pub const CMD_UNLOCK_APP: [u8; 2] = *b"UA";
pub const CMD_UNLOCK_BOOT: [u8; 2] = *b"UB";

/// Payload for `GP` that requests the identification packet.
pub const PACKET_ID: [u8; 2] = *b"ID";

/// Fixed unlock key sent with `UE`/`UA`/`UB`.
pub const UNLOCK_PAYLOAD: [u8; 8] = [0x92, 0x33, 0x62, 0x19, 0x64, 0x27, 0x42, 0x85];

/// `SF` payload: one field, 0x0001 (packet rate) = 0x0000.
pub const QUIET_PAYLOAD: [u8; 5] = [0x01, 0x00, 0x01, 0x00, 0x00];

/// Packet-rate field; quiet mode forces it to zero.
pub const FIELD_PACKET_RATE: u16 = 0x0001;

// Link speeds
pub const BAUD_DEFAULT: u32 = 230_400;
pub const BAUD_EEPROM_UNLOCK: u32 = 115_200;
pub const BAUD_BLOCK_WRITE: u32 = 57_600;

// Firmware transfer
pub const IMAGE_ALIGNMENT: usize = 16;
pub const MAX_BLOCK_LEN: usize = 192;
/// `WA` acknowledgement: header(5) + offset(4) + length(1) + crc(2).
pub const BLOCK_ACK_LEN: usize = 12;
/// Acknowledgement for zero-payload commands (`JI`, `JA`, `SR`).
pub const SHORT_ACK_LEN: usize = 7;

// Timing
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(3);
pub const SYNC_POLL_INTERVAL: Duration = Duration::from_millis(10);
pub const SERIAL_READ_TIMEOUT: Duration = Duration::from_millis(100);
pub const SERIAL_READ_CHUNK: usize = 2048;

/// Effective real-time delivery rate for the visualization path.
pub const VISUAL_RATE_HZ: u32 = 20;
/// Streaming queue holds this many seconds of frames at the configured ODR.
pub const QUEUE_SECONDS: usize = 1000;
