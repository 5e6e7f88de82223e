//! Frame encryption: ChaCha20-Poly1305 with a split key pair.
//!
//! Every sealed frame is `enc(len) || enc(body) || tag`. The 4-byte
//! little-endian length prefix is encrypted under its own key so an
//! observer cannot read frame boundaries off the wire; the receiver
//! decrypts it first to learn how much ciphertext to expect. The body is
//! AEAD-encrypted under the cipher key with the encrypted length as
//! associated data, so the tag covers the whole frame. The sequence
//! number of the session is the nonce: 4 zero bytes followed by the
//! counter in little-endian.

use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key as AeadKey, Nonce as AeadNonce};
use thiserror::Error;
use tradelink_primitives::wire::{LENGTH_FIELD_LEN, MAC_LEN};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Frame sealing/opening failures.
#[derive(Copy, Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum AeadError {
    /// The plaintext's length prefix does not describe its body.
    #[error("frame length prefix declares {declared} bytes but body is {actual}")]
    LengthPrefixMismatch { declared: u32, actual: usize },
    /// Not enough ciphertext for even an empty frame.
    #[error("ciphertext of {0} bytes is too short for a sealed frame")]
    TooShort(usize),
    /// The decrypted length field promises more data than was supplied.
    #[error("declared plaintext length {length} overruns the ciphertext")]
    LengthOverrun { length: u32 },
    /// Tag verification failed; no plaintext is revealed.
    #[error("authentication tag mismatch")]
    AuthenticationFailed,
    /// The cipher refused the payload (only possible for absurd sizes).
    #[error("frame could not be sealed")]
    SealFailure,
}

/// The pair of 32-byte symmetric keys a session runs on.
///
/// Replaced wholesale on rekey, never partially mutated; both halves are
/// wiped on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct KeySet {
    cipher_key: [u8; 32],
    length_key: [u8; 32],
}

impl KeySet {
    #[must_use]
    pub(crate) fn new(cipher_key: [u8; 32], length_key: [u8; 32]) -> Self {
        Self {
            cipher_key,
            length_key,
        }
    }

    pub(crate) fn cipher_key(&self) -> &[u8; 32] {
        &self.cipher_key
    }

    pub(crate) fn length_key(&self) -> &[u8; 32] {
        &self.length_key
    }

    /// Seals a length-prefixed frame.
    ///
    /// `plaintext` must already carry its 4-byte little-endian length
    /// prefix (see `FramedMessage` in the transport layer); the prefix is
    /// validated against the body before anything is encrypted.
    pub fn seal(&self, sequence: u64, plaintext: &[u8]) -> Result<Vec<u8>, AeadError> {
        if plaintext.len() < LENGTH_FIELD_LEN {
            return Err(AeadError::TooShort(plaintext.len()));
        }
        let (prefix, body) = plaintext.split_at(LENGTH_FIELD_LEN);
        let declared = u32::from_le_bytes(prefix.try_into().unwrap_or_default());
        if declared as usize != body.len() {
            return Err(AeadError::LengthPrefixMismatch {
                declared,
                actual: body.len(),
            });
        }

        let nonce = nonce_for(sequence);
        let mut header: [u8; LENGTH_FIELD_LEN] = [0; LENGTH_FIELD_LEN];
        header.copy_from_slice(prefix);
        self.length_cipher(&nonce).apply_keystream(&mut header);

        let sealed_body = ChaCha20Poly1305::new(AeadKey::from_slice(&self.cipher_key))
            .encrypt(
                AeadNonce::from_slice(&nonce),
                Payload {
                    msg: body,
                    aad: &header,
                },
            )
            .map_err(|_| AeadError::SealFailure)?;

        let mut out = Vec::with_capacity(LENGTH_FIELD_LEN + sealed_body.len());
        out.extend_from_slice(&header);
        out.extend_from_slice(&sealed_body);
        Ok(out)
    }

    /// Decrypts only the 4-byte length header of a sealed frame.
    ///
    /// Transports that read from a stream use this to learn how many more
    /// bytes belong to the frame before calling [`KeySet::open`].
    #[must_use]
    pub fn open_length(&self, sequence: u64, header: &[u8; LENGTH_FIELD_LEN]) -> u32 {
        let mut prefix = *header;
        self.length_cipher(&nonce_for(sequence))
            .apply_keystream(&mut prefix);
        u32::from_le_bytes(prefix)
    }

    /// Opens a sealed frame, returning the full length-prefixed plaintext.
    ///
    /// The tag is verified before any plaintext leaves this function; a
    /// corrupted frame yields [`AeadError::AuthenticationFailed`] and
    /// nothing else.
    pub fn open(&self, sequence: u64, ciphertext: &[u8]) -> Result<Vec<u8>, AeadError> {
        if ciphertext.len() < LENGTH_FIELD_LEN + MAC_LEN {
            return Err(AeadError::TooShort(ciphertext.len()));
        }
        let header: [u8; LENGTH_FIELD_LEN] = ciphertext[..LENGTH_FIELD_LEN]
            .try_into()
            .unwrap_or_default();
        let length = self.open_length(sequence, &header);

        let frame_len = (LENGTH_FIELD_LEN + MAC_LEN) as u64 + u64::from(length);
        if frame_len > ciphertext.len() as u64 {
            return Err(AeadError::LengthOverrun { length });
        }
        #[allow(clippy::cast_possible_truncation, reason = "bounded by ciphertext length")]
        let frame_len = frame_len as usize;

        let nonce = nonce_for(sequence);
        let body = ChaCha20Poly1305::new(AeadKey::from_slice(&self.cipher_key))
            .decrypt(
                AeadNonce::from_slice(&nonce),
                Payload {
                    msg: &ciphertext[LENGTH_FIELD_LEN..frame_len],
                    aad: &ciphertext[..LENGTH_FIELD_LEN],
                },
            )
            .map_err(|_| AeadError::AuthenticationFailed)?;

        let mut out = Vec::with_capacity(LENGTH_FIELD_LEN + body.len());
        out.extend_from_slice(&length.to_le_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    fn length_cipher(&self, nonce: &[u8; 12]) -> ChaCha20 {
        ChaCha20::new(
            chacha20::Key::from_slice(&self.length_key),
            chacha20::Nonce::from_slice(nonce),
        )
    }
}

impl core::fmt::Debug for KeySet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("KeySet(..)")
    }
}

fn nonce_for(sequence: u64) -> [u8; 12] {
    let mut nonce = [0_u8; 12];
    nonce[4..].copy_from_slice(&sequence.to_le_bytes());
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kdf::derive_key_set;

    fn frame(body: &[u8]) -> Vec<u8> {
        let mut out = (body.len() as u32).to_le_bytes().to_vec();
        out.extend_from_slice(body);
        out
    }

    fn test_keys() -> KeySet {
        derive_key_set(&[0x42_u8; 32], 0)
    }

    #[test]
    fn seal_open_round_trip() -> eyre::Result<()> {
        let keys = test_keys();
        let plain = frame(b"order book snapshot");

        let sealed = keys.seal(7, &plain)?;
        assert_eq!(sealed.len(), plain.len() + MAC_LEN);

        let opened = keys.open(7, &sealed)?;
        assert_eq!(opened, plain);
        Ok(())
    }

    #[test]
    fn open_length_reads_header() -> eyre::Result<()> {
        let keys = test_keys();
        let plain = frame(&[0xAA; 200]);
        let sealed = keys.seal(0, &plain)?;

        let header: [u8; LENGTH_FIELD_LEN] = sealed[..LENGTH_FIELD_LEN].try_into()?;
        assert_eq!(keys.open_length(0, &header), 200);
        Ok(())
    }

    #[test]
    fn any_flipped_bit_fails_authentication() -> eyre::Result<()> {
        let keys = test_keys();
        let sealed = keys.seal(1, &frame(b"tick"))?;

        for byte in 0..sealed.len() {
            let mut corrupt = sealed.clone();
            corrupt[byte] ^= 0x01;
            let result = keys.open(1, &corrupt);
            // Corrupting the header may also surface as an overrun; it
            // must never produce plaintext.
            assert!(
                matches!(
                    result,
                    Err(AeadError::AuthenticationFailed | AeadError::LengthOverrun { .. })
                ),
                "byte {byte} did not fail"
            );
        }
        Ok(())
    }

    #[test]
    fn wrong_sequence_fails() -> eyre::Result<()> {
        let keys = test_keys();
        let sealed = keys.seal(5, &frame(b"tick"))?;
        assert!(keys.open(6, &sealed).is_err());
        Ok(())
    }

    #[test]
    fn rejects_bad_length_prefix() {
        let keys = test_keys();
        let mut plain = frame(b"abc");
        plain[0] = 9;
        assert_eq!(
            keys.seal(0, &plain),
            Err(AeadError::LengthPrefixMismatch {
                declared: 9,
                actual: 3
            })
        );
    }

    #[test]
    fn rejects_truncated_ciphertext() -> eyre::Result<()> {
        let keys = test_keys();
        let sealed = keys.seal(0, &frame(b"a longer payload"))?;

        assert_eq!(
            keys.open(0, &sealed[..3]),
            Err(AeadError::TooShort(3)),
        );
        assert!(matches!(
            keys.open(0, &sealed[..sealed.len() - 1]),
            Err(AeadError::LengthOverrun { .. })
        ));
        Ok(())
    }

    #[test]
    fn different_key_sets_do_not_interoperate() -> eyre::Result<()> {
        let keys = test_keys();
        let other = derive_key_set(&[0x43_u8; 32], 0);
        let sealed = keys.seal(0, &frame(b"tick"))?;
        // The foreign length key decrypts a garbage length, so this
        // surfaces as either an overrun or a tag failure.
        assert!(other.open(0, &sealed).is_err());
        Ok(())
    }
}
