//! Fixed sizes and sentinel values of the encrypted-transport wire format.

use thiserror::Error;

/// Compressed secp256k1 public key.
pub const PUBLIC_KEY_LEN: usize = 33;
/// Private keys, symmetric key halves and session IDs.
pub const PRIVATE_KEY_LEN: usize = 32;
/// Session identifier derived from the ECDH secret.
pub const SESSION_ID_LEN: usize = 32;
/// Poly1305 authentication tag.
pub const MAC_LEN: usize = 16;
/// Encrypted length prefix carried as associated data on every frame.
pub const LENGTH_FIELD_LEN: usize = 4;

/// encinit payload: compressed public key plus one cipher-suite byte.
pub const ENCINIT_LEN: usize = PUBLIC_KEY_LEN + 1;
/// encack payload: a bare compressed public key.
pub const ENCACK_LEN: usize = PUBLIC_KEY_LEN;
/// AUTHCHALLENGE payload: a double-SHA256 hash.
pub const AUTH_CHALLENGE_LEN: usize = 32;
/// AUTHREPLY payload: a compact ECDSA signature.
pub const AUTH_REPLY_LEN: usize = 64;
/// AUTHPROPOSE payload: a double-SHA256 hash.
pub const AUTH_PROPOSE_LEN: usize = 32;

/// Plaintext bytes a key set may carry before a rekey becomes mandatory.
/// Mirrors the 1 GB bound the cipher suite imposes.
pub const REKEY_BYTE_LIMIT: u64 = 1_000_000_000;

/// An all-zero encack payload means "ratchet rekey now" instead of
/// carrying a public key.
pub const REKEY_SENTINEL: [u8; ENCACK_LEN] = [0x00; ENCACK_LEN];
/// Challenge value a responder sends when it accepts an anonymous
/// requester.
pub const ANONYMOUS_CHALLENGE: [u8; AUTH_CHALLENGE_LEN] = [0xFF; AUTH_CHALLENGE_LEN];
/// Challenge value a responder sends when it explicitly rejects the peer.
pub const REJECTED_CHALLENGE: [u8; AUTH_CHALLENGE_LEN] = [0x00; AUTH_CHALLENGE_LEN];

/// A fixed-length wire field arrived with the wrong number of bytes.
#[derive(Copy, Clone, Debug, Error, PartialEq, Eq)]
#[error("{field} must be {expected} bytes, got {actual}")]
pub struct SizeMismatch {
    pub field: &'static str,
    pub expected: usize,
    pub actual: usize,
}

/// Copies `data` into an `N`-byte array, rejecting any other length.
///
/// Every fixed-size protocol field goes through this before any
/// cryptographic operation is attempted on it.
pub fn exact_bytes<const N: usize>(
    field: &'static str,
    data: &[u8],
) -> Result<[u8; N], SizeMismatch> {
    data.try_into().map_err(|_| SizeMismatch {
        field,
        expected: N,
        actual: data.len(),
    })
}
