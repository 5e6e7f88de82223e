//! Plaintext frame layout used as the pre-encryption payload shape.
//!
//! On the wire (before sealing):
//!
//! ```text
//! u32 total | varint command_len | command | u32 payload_len | payload
//! ```
//!
//! all little-endian, with the Bitcoin compact-size encoding for the
//! command length. The leading `u32 total` doubles as the encrypted
//! length field of the sealed frame, so [`FramedMessage::to_bytes`]
//! output feeds [`crate::SymmetricSession::encrypt`] directly.

use tradelink_primitives::wire::LENGTH_FIELD_LEN;
use tradelink_primitives::SizeMismatch;

use crate::error::ProtocolError;

/// A plaintext command/payload pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FramedMessage {
    command: Vec<u8>,
    payload: Vec<u8>,
}

impl FramedMessage {
    pub fn new(command: impl Into<Vec<u8>>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            command: command.into(),
            payload: payload.into(),
        }
    }

    #[must_use]
    pub fn command(&self) -> &[u8] {
        &self.command
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Serializes the frame, length prefix included.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut inner = Vec::with_capacity(9 + self.command.len() + 4 + self.payload.len());
        write_compact_size(&mut inner, self.command.len() as u64);
        inner.extend_from_slice(&self.command);
        inner.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        inner.extend_from_slice(&self.payload);

        let mut out = Vec::with_capacity(LENGTH_FIELD_LEN + inner.len());
        out.extend_from_slice(&(inner.len() as u32).to_le_bytes());
        out.extend_from_slice(&inner);
        out
    }

    /// Parses a frame, rejecting any buffer whose declared total length
    /// does not exactly account for the remaining bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let header: [u8; LENGTH_FIELD_LEN] =
            bytes
                .get(..LENGTH_FIELD_LEN)
                .and_then(|h| h.try_into().ok())
                .ok_or(SizeMismatch {
                    field: "frame header",
                    expected: LENGTH_FIELD_LEN,
                    actual: bytes.len(),
                })?;
        let total = u32::from_le_bytes(header) as usize;
        let body = &bytes[LENGTH_FIELD_LEN..];
        if total != body.len() {
            return Err(SizeMismatch {
                field: "frame body",
                expected: total,
                actual: body.len(),
            }
            .into());
        }

        let (command_len, consumed) = read_compact_size(body).ok_or(malformed(body.len()))?;
        let rest = &body[consumed..];
        let command_len = usize::try_from(command_len).map_err(|_| malformed(body.len()))?;
        let command = rest.get(..command_len).ok_or(malformed(body.len()))?;
        let rest = &rest[command_len..];

        let payload_len_bytes: [u8; 4] = rest
            .get(..4)
            .and_then(|h| h.try_into().ok())
            .ok_or(malformed(body.len()))?;
        let payload_len = u32::from_le_bytes(payload_len_bytes) as usize;
        let payload = &rest[4..];
        if payload.len() != payload_len {
            return Err(SizeMismatch {
                field: "frame payload",
                expected: payload_len,
                actual: payload.len(),
            }
            .into());
        }

        Ok(Self {
            command: command.to_vec(),
            payload: payload.to_vec(),
        })
    }
}

fn malformed(actual: usize) -> ProtocolError {
    SizeMismatch {
        field: "frame fields",
        expected: 0,
        actual,
    }
    .into()
}

/// Bitcoin compact-size encoding.
fn write_compact_size(out: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xFC => out.push(value as u8),
        0xFD..=0xFFFF => {
            out.push(0xFD);
            out.extend_from_slice(&(value as u16).to_le_bytes());
        }
        0x1_0000..=0xFFFF_FFFF => {
            out.push(0xFE);
            out.extend_from_slice(&(value as u32).to_le_bytes());
        }
        _ => {
            out.push(0xFF);
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
}

/// Returns the decoded value and the number of bytes consumed.
fn read_compact_size(bytes: &[u8]) -> Option<(u64, usize)> {
    match *bytes.first()? {
        tag @ 0..=0xFC => Some((u64::from(tag), 1)),
        0xFD => {
            let raw: [u8; 2] = bytes.get(1..3)?.try_into().ok()?;
            Some((u64::from(u16::from_le_bytes(raw)), 3))
        }
        0xFE => {
            let raw: [u8; 4] = bytes.get(1..5)?.try_into().ok()?;
            Some((u64::from(u32::from_le_bytes(raw)), 5))
        }
        0xFF => {
            let raw: [u8; 8] = bytes.get(1..9)?.try_into().ok()?;
            Some((u64::from_le_bytes(raw), 9))
        }
    }
}
