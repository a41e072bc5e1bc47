//! Two-byte command/packet codes.
//!
//! Every command and response is tagged with a pair of ASCII bytes
//! (`GP`, `SF`, `WA`, ...). This module gives them a typed wrapper.

use std::fmt;

/// A two-byte command or packet code.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandCode([u8; 2]);

impl CommandCode {
    pub const fn new(code: [u8; 2]) -> Self {
        Self(code)
    }

    /// Take the code from the first two bytes of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [a, b, ..] => Some(Self([*a, *b])),
            _ => None,
        }
    }

    pub fn bytes(&self) -> [u8; 2] {
        self.0
    }

    /// ASCII representation with non-printable bytes shown as '.'.
    pub fn as_ascii(&self) -> String {
        self.0
            .iter()
            .map(|&b| if b.is_ascii_graphic() { b as char } else { '.' })
            .collect()
    }

    pub fn matches(&self, expected: [u8; 2]) -> bool {
        self.0 == expected
    }
}

impl From<[u8; 2]> for CommandCode {
    fn from(code: [u8; 2]) -> Self {
        Self(code)
    }
}

impl fmt::Debug for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CommandCode({:02X}{:02X} '{}')",
            self.0[0],
            self.0[1],
            self.as_ascii()
        )
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_ascii())
    }
}
