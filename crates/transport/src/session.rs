//! One unidirectional encrypted session.
//!
//! Each connection runs two of these: the outbound session seals frames
//! this endpoint sends, the inbound session opens frames it receives.
//! A session is keyed by one ECDH exchange — our ephemeral key against
//! the peer's — and afterwards advances a sequence counter that serves as
//! the AEAD nonce, so frames must be decrypted in exactly the order they
//! were encrypted.

use std::sync::Arc;

use rand::thread_rng;
use secp256k1::{PublicKey, SecretKey};
use tracing::{debug, error};
use tradelink_crypto::{ecdh_x_coordinate, kdf, CryptoContext, KeySet};
use tradelink_primitives::wire::{
    exact_bytes, ENCACK_LEN, ENCINIT_LEN, PUBLIC_KEY_LEN, REKEY_BYTE_LIMIT,
};
use tradelink_primitives::{CipherSuite, SessionId};

use crate::error::{DecryptError, ProtocolError};

/// Traffic direction of a session relative to this endpoint.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Frames the peer sends to us.
    Inbound,
    /// Frames we send to the peer.
    Outbound,
}

/// How a session's key set is replaced without a fresh ECDH exchange.
#[derive(Debug)]
pub enum RekeyMode<'a> {
    /// Periodic forward-secrecy ratchet, triggered by the byte budget or
    /// an in-band rekey request.
    Ratchet,
    /// One-time rekey after mutual authentication, mixing in the key
    /// material of the opposite channel and the identity keys of the two
    /// ends of this channel.
    BindIdentities {
        opposite: &'a KeySet,
        sender_identity: [u8; PUBLIC_KEY_LEN],
        receiver_identity: [u8; PUBLIC_KEY_LEN],
    },
}

/// One directional session: ephemeral ECDH state, derived keys, counters.
pub struct SymmetricSession {
    ctx: Arc<CryptoContext>,
    direction: Direction,
    ephemeral: Option<SecretKey>,
    ephemeral_public: Option<PublicKey>,
    suite: Option<CipherSuite>,
    session_id: Option<SessionId>,
    keys: Option<KeySet>,
    sequence: u64,
    bytes_on_keys: u64,
    rekey_limit: u64,
    encinit_seen: bool,
    encack_seen: bool,
}

impl SymmetricSession {
    /// Creates a session with a freshly generated ephemeral key.
    #[must_use]
    pub fn new(ctx: Arc<CryptoContext>, direction: Direction) -> Self {
        let (secret, _) = ctx.generate_keypair(&mut thread_rng());
        Self::with_ephemeral(ctx, direction, secret)
    }

    /// Creates a session with a caller-supplied ephemeral key.
    ///
    /// Only for test harnesses and hardware-held keys; a predictable
    /// ephemeral key forfeits every guarantee this layer makes.
    #[must_use]
    pub fn with_ephemeral(ctx: Arc<CryptoContext>, direction: Direction, secret: SecretKey) -> Self {
        Self {
            ctx,
            direction,
            ephemeral: Some(secret),
            ephemeral_public: None,
            suite: None,
            session_id: None,
            keys: None,
            sequence: 0,
            bytes_on_keys: 0,
            rekey_limit: REKEY_BYTE_LIMIT,
            encinit_seen: false,
            encack_seen: false,
        }
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The session identifier, once key agreement has run.
    #[must_use]
    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    #[must_use]
    pub fn encinit_seen(&self) -> bool {
        self.encinit_seen
    }

    #[must_use]
    pub fn encack_seen(&self) -> bool {
        self.encack_seen
    }

    /// Both negotiation messages have passed through this session.
    #[must_use]
    pub fn handshake_complete(&self) -> bool {
        self.encinit_seen && self.encack_seen
    }

    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    #[must_use]
    pub fn bytes_on_keys(&self) -> u64 {
        self.bytes_on_keys
    }

    pub(crate) fn mark_encinit_seen(&mut self) {
        self.encinit_seen = true;
    }

    pub(crate) fn mark_encack_seen(&mut self) {
        self.encack_seen = true;
    }

    pub(crate) fn set_cipher_suite(&mut self, suite: CipherSuite) {
        self.suite = Some(suite);
    }

    /// Exports the compressed ephemeral public key. Computed on first
    /// use and cached; the export is idempotent.
    pub fn ephemeral_public_key(&mut self) -> Result<PublicKey, ProtocolError> {
        if let Some(public) = self.ephemeral_public {
            return Ok(public);
        }
        let secret = self
            .ephemeral
            .as_ref()
            .ok_or(ProtocolError::SequenceViolation {
                operation: "exporting the ephemeral key after it was erased",
            })?;
        let public = self.ctx.public_key(secret);
        self.ephemeral_public = Some(public);
        Ok(public)
    }

    /// Runs ECDH against the peer's public key and derives the session
    /// identifier and key set.
    ///
    /// The peer key must be exactly 33 bytes and a valid compressed
    /// curve point. Outbound sessions erase their ephemeral secret here;
    /// inbound sessions keep it until [`SymmetricSession::encack_data`]
    /// because the responder still has to serialize its own public key.
    pub fn compute_shared_secret(&mut self, peer_public: &[u8]) -> Result<(), ProtocolError> {
        let key_bytes: [u8; PUBLIC_KEY_LEN] = exact_bytes("peer public key", peer_public)?;
        let suite = self.suite.ok_or(ProtocolError::SequenceViolation {
            operation: "key agreement before cipher-suite negotiation",
        })?;
        if self.keys.is_some() {
            return Err(ProtocolError::SequenceViolation {
                operation: "repeating key agreement on a keyed session",
            });
        }
        let peer = PublicKey::from_slice(&key_bytes).map_err(|_| {
            error!(direction = ?self.direction, "peer supplied an invalid public key");
            ProtocolError::InvalidPeerKey
        })?;
        let secret = self
            .ephemeral
            .as_ref()
            .ok_or(ProtocolError::SequenceViolation {
                operation: "key agreement after the ephemeral key was erased",
            })?;

        let shared_x = ecdh_x_coordinate(&peer, secret);
        self.keys = Some(kdf::derive_key_set(&shared_x, suite.as_byte()));
        let session_id = SessionId::from(kdf::derive_session_id(&shared_x, suite.as_byte()));
        debug!(session = %session_id, direction = ?self.direction, "session keys derived");
        self.session_id = Some(session_id);

        if self.direction == Direction::Outbound {
            self.cleanse_ephemeral();
        }
        Ok(())
    }

    /// Erases the ephemeral secret. Idempotent.
    pub(crate) fn cleanse_ephemeral(&mut self) {
        if let Some(mut secret) = self.ephemeral.take() {
            secret.non_secure_erase();
        }
    }

    /// True once the byte budget forces a rekey before `additional` more
    /// plaintext bytes may be sealed under the current key set.
    #[must_use]
    pub fn needs_rekey(&self, additional: usize) -> bool {
        self.bytes_on_keys + additional as u64 >= self.rekey_limit
    }

    #[cfg(test)]
    pub(crate) fn set_rekey_limit(&mut self, limit: u64) {
        self.rekey_limit = limit;
    }

    /// Replaces the key set and resets the byte counter. The sequence
    /// counter is deliberately untouched: both ends keep counting across
    /// rekeys, so the nonce stream never repeats.
    pub fn rekey(&mut self, mode: RekeyMode<'_>) -> Result<(), ProtocolError> {
        let session_id = *self.session_id.as_ref().ok_or(ProtocolError::SequenceViolation {
            operation: "rekeying before key agreement",
        })?;
        let keys = self.keys.as_ref().ok_or(ProtocolError::SequenceViolation {
            operation: "rekeying before key agreement",
        })?;

        let next = match mode {
            RekeyMode::Ratchet => kdf::ratchet_key_set(session_id.as_bytes(), keys),
            RekeyMode::BindIdentities {
                opposite,
                sender_identity,
                receiver_identity,
            } => kdf::identity_bound_key_set(
                session_id.as_bytes(),
                keys,
                opposite,
                &sender_identity,
                &receiver_identity,
            ),
        };
        self.keys = Some(next);
        self.bytes_on_keys = 0;
        debug!(session = %session_id, direction = ?self.direction, "session rekeyed");
        Ok(())
    }

    pub(crate) fn key_set(&self) -> Result<&KeySet, ProtocolError> {
        self.keys.as_ref().ok_or(ProtocolError::SequenceViolation {
            operation: "reading key material before key agreement",
        })
    }

    /// Seals a length-prefixed frame under the current key set.
    ///
    /// Advances the sequence counter and adds the plaintext length to the
    /// rekey byte budget. Any failure here is fatal to the connection.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let keys = self.keys.as_ref().ok_or(ProtocolError::SequenceViolation {
            operation: "encrypting before key agreement",
        })?;
        let ciphertext = keys.seal(self.sequence, plaintext)?;
        self.sequence += 1;
        self.bytes_on_keys += plaintext.len() as u64;
        Ok(ciphertext)
    }

    /// Opens a sealed frame, returning the full length-prefixed
    /// plaintext. Counters advance only when the frame authenticates.
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, DecryptError> {
        let keys = self.keys.as_ref().ok_or(DecryptError::NotReady)?;
        let plaintext = keys.open(self.sequence, ciphertext)?;
        self.sequence += 1;
        self.bytes_on_keys += plaintext.len() as u64;
        Ok(plaintext)
    }

    /// Builds the encinit payload: our compressed ephemeral public key
    /// followed by the cipher-suite byte.
    pub fn encinit_data(&mut self, suite: CipherSuite) -> Result<[u8; ENCINIT_LEN], ProtocolError> {
        self.suite = Some(suite);
        let public = self.ephemeral_public_key()?;
        let mut buf = [0_u8; ENCINIT_LEN];
        buf[..PUBLIC_KEY_LEN].copy_from_slice(&public.serialize());
        buf[PUBLIC_KEY_LEN] = suite.as_byte();
        Ok(buf)
    }

    /// Builds the encack payload: our compressed ephemeral public key.
    ///
    /// Only legal after the peer's encinit has been processed; erases the
    /// ephemeral secret, which has served both the shared-secret
    /// derivation and this export.
    pub fn encack_data(&mut self) -> Result<[u8; ENCACK_LEN], ProtocolError> {
        if !self.encinit_seen {
            error!("encack requested before an encinit arrived");
            return Err(ProtocolError::SequenceViolation {
                operation: "building encack before the peer's encinit",
            });
        }
        let public = self.ephemeral_public_key()?;
        let mut buf = [0_u8; ENCACK_LEN];
        buf.copy_from_slice(&public.serialize());
        self.cleanse_ephemeral();
        Ok(buf)
    }
}

impl core::fmt::Debug for SymmetricSession {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SymmetricSession")
            .field("direction", &self.direction)
            .field("session_id", &self.session_id)
            .field("sequence", &self.sequence)
            .field("encinit_seen", &self.encinit_seen)
            .field("encack_seen", &self.encack_seen)
            .finish_non_exhaustive()
    }
}
