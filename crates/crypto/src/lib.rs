//! Cryptographic building blocks for the encrypted terminal↔signer link.
//!
//! This crate composes the primitive libraries the transport layer needs:
//! secp256k1 for ECDH and compact ECDSA, HKDF-SHA256 for key derivation,
//! and the split length/cipher ChaCha20-Poly1305 construction for frame
//! encryption. It holds no protocol state; the state machines live in
//! `tradelink-transport`.

use rand::Rng;
use secp256k1::ecdh::shared_secret_point;
use secp256k1::{ecdsa, All, Message, PublicKey, Secp256k1, SecretKey};
use zeroize::Zeroizing;

pub mod aead;
pub mod kdf;

pub use aead::{AeadError, KeySet};

/// One initialized secp256k1 context per process.
///
/// Context creation is not free, so the application creates a single
/// [`CryptoContext`] at startup and hands it to every connection. This
/// replaces any notion of a lazily-initialized global.
pub struct CryptoContext {
    secp: Secp256k1<All>,
}

impl CryptoContext {
    #[must_use]
    pub fn new() -> Self {
        Self {
            secp: Secp256k1::new(),
        }
    }

    /// Generates a fresh secp256k1 keypair.
    pub fn generate_keypair<R: Rng + ?Sized>(&self, rng: &mut R) -> (SecretKey, PublicKey) {
        let secret = SecretKey::new(rng);
        let public = PublicKey::from_secret_key(&self.secp, &secret);
        (secret, public)
    }

    /// Derives the compressed public key for `secret`.
    #[must_use]
    pub fn public_key(&self, secret: &SecretKey) -> PublicKey {
        PublicKey::from_secret_key(&self.secp, secret)
    }

    /// Signs a 32-byte digest, returning the 64-byte compact signature the
    /// wire format carries. Nonces are deterministic per RFC 6979.
    #[must_use]
    pub fn sign_digest(&self, digest: &[u8; 32], secret: &SecretKey) -> [u8; 64] {
        let message = Message::from_digest(*digest);
        self.secp.sign_ecdsa(&message, secret).serialize_compact()
    }

    /// Verifies a 64-byte compact signature over `digest`.
    ///
    /// A byte string that does not even parse as a compact signature
    /// verifies as false; the caller cannot distinguish that from a wrong
    /// key, which is deliberate.
    #[must_use]
    pub fn verify_digest(&self, digest: &[u8; 32], signature: &[u8; 64], key: &PublicKey) -> bool {
        let Ok(signature) = ecdsa::Signature::from_compact(signature) else {
            return false;
        };
        let message = Message::from_digest(*digest);
        self.secp.verify_ecdsa(&message, &signature, key).is_ok()
    }
}

impl Default for CryptoContext {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for CryptoContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("CryptoContext")
    }
}

/// ECDH: the x-coordinate of `peer * secret`.
///
/// The x-coordinate alone feeds the KDF; using the full point or a hashed
/// variant would derive different sessions than the peer.
#[must_use]
pub fn ecdh_x_coordinate(peer: &PublicKey, secret: &SecretKey) -> Zeroizing<[u8; 32]> {
    let point = Zeroizing::new(shared_secret_point(peer, secret));
    let mut x = Zeroizing::new([0_u8; 32]);
    x.copy_from_slice(&point[..32]);
    x
}
