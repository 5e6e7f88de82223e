//! Key derivation: HKDF-SHA256 expansion of the ECDH secret into the
//! session identifier and the split key set, plus the two rekey
//! derivations that replace a key set without a fresh ECDH exchange.

use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use tradelink_primitives::wire::PUBLIC_KEY_LEN;
use zeroize::Zeroizing;

use crate::aead::KeySet;

/// Salt shared by every HKDF expansion of the protocol.
pub const ECDH_KDF_SALT: &[u8] = b"bitcoinecdh";

const SESSION_ID_INFO: &[u8] = b"BitcoinSessionID";
const CIPHER_KEY_INFO: &[u8] = b"BitcoinK2";
const LENGTH_KEY_INFO: &[u8] = b"BitcoinK1";

fn hkdf_expand_32(ikm: &[u8], info: &[u8]) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(Some(ECDH_KDF_SALT), ikm);
    let mut okm = [0_u8; 32];
    hk.expand(info, &mut okm)
        .expect("32 bytes is within the HKDF-SHA256 output limit");
    okm
}

fn ikm(shared_x: &[u8; 32], suite_byte: u8) -> Zeroizing<[u8; 33]> {
    let mut ikm = Zeroizing::new([0_u8; 33]);
    ikm[..32].copy_from_slice(shared_x);
    ikm[32] = suite_byte;
    ikm
}

/// Derives the 32-byte session identifier from the ECDH x-coordinate and
/// the negotiated suite byte.
#[must_use]
pub fn derive_session_id(shared_x: &[u8; 32], suite_byte: u8) -> [u8; 32] {
    hkdf_expand_32(&*ikm(shared_x, suite_byte), SESSION_ID_INFO)
}

/// Derives the initial key set (cipher key + length key) for a session.
#[must_use]
pub fn derive_key_set(shared_x: &[u8; 32], suite_byte: u8) -> KeySet {
    let ikm = ikm(shared_x, suite_byte);
    KeySet::new(
        hkdf_expand_32(&*ikm, CIPHER_KEY_INFO),
        hkdf_expand_32(&*ikm, LENGTH_KEY_INFO),
    )
}

/// SHA256(SHA256(parts...)).
#[must_use]
pub fn sha256d(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    Sha256::digest(hasher.finalize()).into()
}

/// Periodic ratchet: each key half becomes
/// SHA256d(session_id || old_half). Forward secrecy within the session:
/// old traffic keys are unrecoverable from the new set.
#[must_use]
pub fn ratchet_key_set(session_id: &[u8; 32], keys: &KeySet) -> KeySet {
    KeySet::new(
        sha256d(&[session_id, keys.cipher_key()]),
        sha256d(&[session_id, keys.length_key()]),
    )
}

/// One-time rekey after mutual authentication, binding the channel to the
/// verified identities. Each half becomes
/// SHA256d(session_id || old_half || opposite_session_half ||
/// sender_identity || receiver_identity), where sender/receiver are the
/// identity keys of the two ends of this directional channel.
///
/// Both peers must pass the pre-rekey key material of the opposite
/// channel, or the two sides diverge.
#[must_use]
pub fn identity_bound_key_set(
    session_id: &[u8; 32],
    keys: &KeySet,
    opposite: &KeySet,
    sender_identity: &[u8; PUBLIC_KEY_LEN],
    receiver_identity: &[u8; PUBLIC_KEY_LEN],
) -> KeySet {
    KeySet::new(
        sha256d(&[
            session_id,
            keys.cipher_key(),
            opposite.cipher_key(),
            sender_identity,
            receiver_identity,
        ]),
        sha256d(&[
            session_id,
            keys.length_key(),
            opposite.length_key(),
            sender_identity,
            receiver_identity,
        ]),
    )
}
