//! One encrypted, authenticated link: a session pair plus the
//! authentication machine, with the message-dispatch rules between them.
//!
//! The transport layer owns the socket and the message types; this type
//! owns every byte of protocol state. Feed incoming negotiation payloads
//! to the `process_*` methods, send whatever the `*_data` methods
//! produce, and once [`EncryptedConnection::connection_complete`] holds,
//! move application traffic through
//! [`EncryptedConnection::assemble_packet`] /
//! [`EncryptedConnection::decrypt_packet`]. Drop the whole object on any
//! error; partial trust is never granted.

use std::sync::Arc;

use secp256k1::{PublicKey, SecretKey};
use tracing::{debug, error};
use tradelink_crypto::CryptoContext;
use tradelink_primitives::wire::{
    exact_bytes, AUTH_CHALLENGE_LEN, AUTH_PROPOSE_LEN, AUTH_REPLY_LEN, ENCACK_LEN, ENCINIT_LEN,
    PUBLIC_KEY_LEN, REKEY_SENTINEL,
};
use tradelink_primitives::{CipherSuite, SessionId};

use crate::auth::{AuthHandshake, AuthStage};
use crate::config::HandshakePolicy;
use crate::error::{DecryptError, ProtocolError, Verification};
use crate::message::FramedMessage;
use crate::peers::PeerKeyStore;
use crate::session::{Direction, RekeyMode, SymmetricSession};

/// Command carried by the in-band rekey frame.
const REKEY_COMMAND: &[u8] = b"encack";

/// A logical link to one peer. Created once per connection attempt and
/// discarded wholesale on any unrecoverable error.
pub struct EncryptedConnection {
    inbound: SymmetricSession,
    outbound: SymmetricSession,
    auth: AuthHandshake,
    good_propose: bool,
}

impl EncryptedConnection {
    #[must_use]
    pub fn new(
        ctx: Arc<CryptoContext>,
        store: Arc<dyn PeerKeyStore>,
        policy: HandshakePolicy,
    ) -> Self {
        Self {
            inbound: SymmetricSession::new(Arc::clone(&ctx), Direction::Inbound),
            outbound: SymmetricSession::new(Arc::clone(&ctx), Direction::Outbound),
            auth: AuthHandshake::new(ctx, store, policy),
            good_propose: false,
        }
    }

    /// Like [`EncryptedConnection::new`] but with caller-supplied
    /// ephemeral keys. Only for test harnesses and hardware-held keys.
    #[must_use]
    pub fn with_ephemeral_secrets(
        ctx: Arc<CryptoContext>,
        store: Arc<dyn PeerKeyStore>,
        policy: HandshakePolicy,
        inbound_secret: SecretKey,
        outbound_secret: SecretKey,
    ) -> Self {
        Self {
            inbound: SymmetricSession::with_ephemeral(
                Arc::clone(&ctx),
                Direction::Inbound,
                inbound_secret,
            ),
            outbound: SymmetricSession::with_ephemeral(
                Arc::clone(&ctx),
                Direction::Outbound,
                outbound_secret,
            ),
            auth: AuthHandshake::new(ctx, store, policy),
            good_propose: false,
        }
    }

    // ---- key agreement -------------------------------------------------

    /// Builds the encinit payload for the outbound session and marks the
    /// session as having started its handshake.
    pub fn encinit_data(
        &mut self,
        suite: CipherSuite,
    ) -> Result<[u8; ENCINIT_LEN], ProtocolError> {
        self.outbound.mark_encinit_seen();
        self.outbound.encinit_data(suite)
    }

    /// Handles an incoming encinit. Legal only on the inbound session,
    /// and only once.
    pub fn process_encinit(
        &mut self,
        msg: &[u8],
        direction: Direction,
    ) -> Result<(), ProtocolError> {
        let buf: [u8; ENCINIT_LEN] = exact_bytes("encinit", msg)?;
        if direction == Direction::Outbound {
            error!("encinit received on the outbound session");
            return Err(ProtocolError::SequenceViolation {
                operation: "processing encinit on the outbound session",
            });
        }
        if self.inbound.encinit_seen() {
            error!(session = ?self.inbound.session_id(), "second encinit on one session");
            return Err(ProtocolError::SequenceViolation {
                operation: "processing a repeated encinit",
            });
        }

        let suite = CipherSuite::from_byte(buf[PUBLIC_KEY_LEN])?;
        self.inbound.set_cipher_suite(suite);
        self.inbound.compute_shared_secret(&buf[..PUBLIC_KEY_LEN])?;
        self.inbound.mark_encinit_seen();
        Ok(())
    }

    /// Builds the encack payload for the inbound session.
    pub fn encack_data(&mut self) -> Result<[u8; ENCACK_LEN], ProtocolError> {
        self.inbound.mark_encack_seen();
        self.inbound.encack_data()
    }

    /// Handles an incoming encack.
    ///
    /// On the outbound session this must be the peer's public key and it
    /// completes our key agreement; the rekey sentinel is illegal there.
    /// On the inbound session only the rekey sentinel is legal, and it
    /// ratchets the inbound key set.
    pub fn process_encack(
        &mut self,
        msg: &[u8],
        direction: Direction,
    ) -> Result<(), ProtocolError> {
        let buf: [u8; ENCACK_LEN] = exact_bytes("encack", msg)?;
        match direction {
            Direction::Outbound => {
                if !self.outbound.encinit_seen() {
                    error!("encack before our encinit went out");
                    return Err(ProtocolError::SequenceViolation {
                        operation: "processing encack before encinit",
                    });
                }
                if buf == REKEY_SENTINEL {
                    error!("rekey sentinel during key agreement");
                    return Err(ProtocolError::SequenceViolation {
                        operation: "processing a rekey encack during key agreement",
                    });
                }
                self.outbound.compute_shared_secret(&buf)?;
                self.outbound.mark_encack_seen();
                Ok(())
            }
            Direction::Inbound => {
                if buf != REKEY_SENTINEL {
                    error!("non-rekey encack on the inbound session");
                    return Err(ProtocolError::SequenceViolation {
                        operation: "processing a keying encack on the inbound session",
                    });
                }
                if !self.inbound.handshake_complete() {
                    return Err(ProtocolError::SequenceViolation {
                        operation: "rekeying before key agreement is complete",
                    });
                }
                self.inbound.rekey(RekeyMode::Ratchet)
            }
        }
    }

    /// Both sessions have completed key agreement.
    #[must_use]
    pub fn connection_complete(&self) -> bool {
        self.inbound.handshake_complete() && self.outbound.handshake_complete()
    }

    #[must_use]
    pub fn session_id(&self, direction: Direction) -> Option<&SessionId> {
        match direction {
            Direction::Inbound => self.inbound.session_id(),
            Direction::Outbound => self.outbound.session_id(),
        }
    }

    // ---- application traffic -------------------------------------------

    /// Seals a length-prefixed plaintext frame for sending.
    pub fn assemble_packet(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        self.outbound.encrypt(plaintext)
    }

    /// Opens a received frame.
    pub fn decrypt_packet(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, DecryptError> {
        self.inbound.decrypt(ciphertext)
    }

    /// Whether sealing `additional` more bytes would cross the outbound
    /// session's rekey budget.
    #[must_use]
    pub fn rekey_needed(&self, additional: usize) -> bool {
        self.outbound.needs_rekey(additional)
    }

    /// Builds the encrypted in-band rekey request (an `encack` frame
    /// carrying the all-zero sentinel) and ratchets the outbound session.
    /// Send the returned packet *before* sealing anything else.
    pub fn request_rekey(&mut self) -> Result<Vec<u8>, ProtocolError> {
        if !self.connection_complete() {
            error!("rekey requested before the connection completed");
            return Err(ProtocolError::SequenceViolation {
                operation: "rekeying an incomplete connection",
            });
        }
        let frame = FramedMessage::new(REKEY_COMMAND, REKEY_SENTINEL.to_vec()).to_bytes();
        let packet = self.outbound.encrypt(&frame)?;
        self.outbound.rekey(RekeyMode::Ratchet)?;
        debug!(session = ?self.outbound.session_id(), "outbound session ratcheted");
        Ok(packet)
    }

    // ---- authentication ------------------------------------------------

    /// AUTHCHALLENGE payload: step 1 (`from_requester`) or step 4. On
    /// step 4 `good_propose` reports whether the AUTHPROPOSE verified;
    /// a rejected build still yields a payload (a sentinel) that must be
    /// transmitted.
    pub fn auth_challenge_data(
        &mut self,
        target: &str,
        from_requester: bool,
        good_propose: bool,
    ) -> Result<([u8; AUTH_CHALLENGE_LEN], Verification), ProtocolError> {
        self.auth.challenge_data(
            &self.inbound,
            &self.outbound,
            target,
            from_requester,
            good_propose,
        )
    }

    /// AUTHREPLY payload: step 2 (`from_responder`) or step 5.
    pub fn auth_reply_data(
        &mut self,
        from_responder: bool,
        good_challenge: bool,
    ) -> Result<([u8; AUTH_REPLY_LEN], Verification), ProtocolError> {
        self.auth
            .reply_data(&self.outbound, from_responder, good_challenge)
    }

    /// AUTHPROPOSE payload (step 3).
    pub fn auth_propose_data(&mut self) -> Result<[u8; AUTH_PROPOSE_LEN], ProtocolError> {
        self.auth.propose_data(&self.outbound)
    }

    pub fn process_auth_challenge(
        &mut self,
        msg: &[u8],
        from_requester: bool,
    ) -> Result<Verification, ProtocolError> {
        self.auth
            .process_challenge(&self.inbound, msg, from_requester)
    }

    pub fn process_auth_reply(
        &mut self,
        msg: &[u8],
        from_responder: bool,
        good_challenge: bool,
    ) -> Result<Verification, ProtocolError> {
        self.auth
            .process_reply(&self.inbound, msg, from_responder, good_challenge)
    }

    pub fn process_auth_propose(&mut self, msg: &[u8]) -> Result<Verification, ProtocolError> {
        self.auth.process_propose(&self.inbound, msg)
    }

    /// Records that this responder verified the requester's AUTHPROPOSE;
    /// consulted again when the final AUTHREPLY arrives.
    pub fn set_good_propose(&mut self) {
        self.good_propose = true;
    }

    #[must_use]
    pub fn good_propose(&self) -> bool {
        self.good_propose
    }

    /// Performs the identity rekey on both sessions once the handshake
    /// has exchanged its final reply. After this, traffic runs under
    /// keys bound to the verified identities.
    pub fn finalize_authentication(&mut self) -> Result<(), ProtocolError> {
        self.auth.finalize(&mut self.inbound, &mut self.outbound)
    }

    #[must_use]
    pub fn auth_stage(&self) -> AuthStage {
        self.auth.stage()
    }

    /// The peer identity key pinned by the handshake so far.
    #[must_use]
    pub fn peer_identity(&self) -> Option<PublicKey> {
        self.auth.peer_identity()
    }

    #[must_use]
    pub fn own_identity_key(&self) -> PublicKey {
        self.auth.own_identity()
    }

    /// Whether `name` is registered with exactly this identity key.
    #[must_use]
    pub fn have_public_key(&self, key: &PublicKey, name: &str) -> bool {
        self.auth.have_public_key(key, name)
    }

    /// Base58Check fingerprint of the local identity key.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        self.auth.fingerprint()
    }
}

impl core::fmt::Debug for EncryptedConnection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EncryptedConnection")
            .field("complete", &self.connection_complete())
            .field("auth", &self.auth.stage())
            .finish_non_exhaustive()
    }
}
