//! Symmetric cipher-suite negotiation.

use thiserror::Error;

/// The one-byte suite identifier at the tail of every encinit message.
///
/// Exactly one suite exists today; the byte is still validated on every
/// incoming negotiation message so that an unknown identifier is rejected
/// before any key material is derived from it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum CipherSuite {
    /// ChaCha20-Poly1305 with a split length/cipher key pair.
    ChaCha20Poly1305 = 0x00,
}

/// The peer offered a cipher-suite byte this implementation does not know.
#[derive(Copy, Clone, Debug, Error, PartialEq, Eq)]
#[error("unsupported cipher suite identifier {0:#04x}")]
pub struct UnsupportedCipherSuite(pub u8);

impl CipherSuite {
    pub fn from_byte(byte: u8) -> Result<Self, UnsupportedCipherSuite> {
        match byte {
            0x00 => Ok(Self::ChaCha20Poly1305),
            other => Err(UnsupportedCipherSuite(other)),
        }
    }

    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}
