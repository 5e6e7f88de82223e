//! Mutual-authentication state machine.
//!
//! Six messages, strictly ordered, layered on top of an established
//! session pair: the requester proves it knows the responder's identity
//! key (CHALLENGE1/REPLY1), offers its own identity (PROPOSE), and the
//! responder confirms it back (CHALLENGE2/REPLY2). Hashes and signatures
//! commit to the session identifiers, so the authentication is bound to
//! this very channel. A successful run ends in an identity rekey of both
//! sessions.
//!
//! Verification failures on the PROPOSE/CHALLENGE2/REPLY2 legs can be
//! tolerated when local policy permits anonymous requesters; everything
//! else is terminal. A failed machine stays failed — the owning
//! connection must be discarded and renegotiated from encinit.

use std::sync::Arc;

use secp256k1::PublicKey;
use tracing::{debug, error};
use tradelink_crypto::{kdf, CryptoContext};
use tradelink_primitives::wire::{
    exact_bytes, ANONYMOUS_CHALLENGE, AUTH_CHALLENGE_LEN, AUTH_PROPOSE_LEN, AUTH_REPLY_LEN,
    PUBLIC_KEY_LEN, REJECTED_CHALLENGE,
};
use tradelink_primitives::SessionId;

use crate::config::HandshakePolicy;
use crate::error::{ProtocolError, Verification};
use crate::peers::PeerKeyStore;
use crate::session::SymmetricSession;

const CHALLENGE1_TAG: u8 = b'i';
const PROPOSE_TAG: u8 = b'p';
const CHALLENGE2_TAG: u8 = b'r';

/// Externally visible position of the state machine.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AuthStage {
    Inactive,
    Challenge1,
    Reply1,
    Propose,
    Challenge2,
    Reply2,
    Success,
    Failed,
}

/// Internal state. Each variant carries exactly the data valid in that
/// state: the peer identity selected so far, if any. Resetting or
/// failing constructs a fresh variant, so no stale key can leak across
/// runs.
#[derive(Copy, Clone, Debug)]
enum AuthState {
    Inactive,
    Challenge1 { peer_key: Option<PublicKey> },
    Reply1 { peer_key: Option<PublicKey> },
    Propose { peer_key: Option<PublicKey> },
    Challenge2 { peer_key: Option<PublicKey> },
    Reply2 { peer_key: Option<PublicKey> },
    Success { peer_key: PublicKey },
    Failed,
}

/// The mutual-authentication machine of one connection.
pub struct AuthHandshake {
    ctx: Arc<CryptoContext>,
    store: Arc<dyn PeerKeyStore>,
    policy: HandshakePolicy,
    state: AuthState,
}

impl AuthHandshake {
    #[must_use]
    pub fn new(
        ctx: Arc<CryptoContext>,
        store: Arc<dyn PeerKeyStore>,
        policy: HandshakePolicy,
    ) -> Self {
        Self {
            ctx,
            store,
            policy,
            state: AuthState::Inactive,
        }
    }

    #[must_use]
    pub fn stage(&self) -> AuthStage {
        match self.state {
            AuthState::Inactive => AuthStage::Inactive,
            AuthState::Challenge1 { .. } => AuthStage::Challenge1,
            AuthState::Reply1 { .. } => AuthStage::Reply1,
            AuthState::Propose { .. } => AuthStage::Propose,
            AuthState::Challenge2 { .. } => AuthStage::Challenge2,
            AuthState::Reply2 { .. } => AuthStage::Reply2,
            AuthState::Success { .. } => AuthStage::Success,
            AuthState::Failed => AuthStage::Failed,
        }
    }

    /// The peer identity key selected so far: the responder's registered
    /// key on the requester side, the matched (or anonymously offered)
    /// requester key on the responder side.
    #[must_use]
    pub fn peer_identity(&self) -> Option<PublicKey> {
        match self.state {
            AuthState::Inactive | AuthState::Failed => None,
            AuthState::Challenge1 { peer_key }
            | AuthState::Reply1 { peer_key }
            | AuthState::Propose { peer_key }
            | AuthState::Challenge2 { peer_key }
            | AuthState::Reply2 { peer_key } => peer_key,
            AuthState::Success { peer_key } => Some(peer_key),
        }
    }

    #[must_use]
    pub fn own_identity(&self) -> PublicKey {
        self.store.own_identity()
    }

    /// Whether `name` is registered with exactly this identity key.
    #[must_use]
    pub fn have_public_key(&self, key: &PublicKey, name: &str) -> bool {
        self.store.public_key(name).is_some_and(|known| known == *key)
    }

    /// Base58Check fingerprint of the local identity key, for display
    /// and out-of-band comparison.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let digest = kdf::sha256d(&[&self.store.own_identity().serialize()]);
        let mut data = Vec::with_capacity(23);
        data.extend_from_slice(&[0x0F, 0xFF, 0x01]);
        data.extend_from_slice(&digest[..20]);
        bs58::encode(data).with_check().into_string()
    }

    /// Builds AUTHCHALLENGE data: step 1 on the requester
    /// (`from_requester`), step 4 on the responder.
    ///
    /// The payload is returned even when verification-level policy turns
    /// it into a sentinel (`Rejected`): the responder transmits the
    /// all-`0xFF` anonymous acceptance, and the all-zero rejection, as
    /// regular challenge payloads.
    pub(crate) fn challenge_data(
        &mut self,
        inbound: &SymmetricSession,
        outbound: &SymmetricSession,
        target: &str,
        from_requester: bool,
        good_propose: bool,
    ) -> Result<([u8; AUTH_CHALLENGE_LEN], Verification), ProtocolError> {
        if from_requester {
            if matches!(self.state, AuthState::Failed) {
                return Err(ProtocolError::SequenceViolation {
                    operation: "restarting a failed authentication handshake",
                });
            }
            self.state = AuthState::Challenge1 { peer_key: None };
            let session_id = self.established_id(outbound, "building AUTHCHALLENGE (step 1)")?;
            let peer = self.store.public_key(target).ok_or_else(|| {
                error!(peer = %target, "peer not found in the authorized-peers store");
                self.fail(ProtocolError::UnknownPeer(target.to_owned()))
            })?;
            self.state = AuthState::Challenge1 {
                peer_key: Some(peer),
            };
            return Ok((auth_hash(&session_id, CHALLENGE1_TAG, &peer), Verification::Passed));
        }

        let AuthState::Propose { peer_key } = self.state else {
            return Err(self.sequence_failure("building AUTHCHALLENGE (step 4)"));
        };
        self.state = AuthState::Challenge2 { peer_key };
        if !inbound.handshake_complete() {
            return Err(self.fail(ProtocolError::SequenceViolation {
                operation: "building AUTHCHALLENGE (step 4)",
            }));
        }
        let session_id = self.established_id(outbound, "building AUTHCHALLENGE (step 4)")?;

        if good_propose {
            if let Some(peer) = peer_key {
                return Ok((auth_hash(&session_id, CHALLENGE2_TAG, &peer), Verification::Passed));
            }
        }
        if self.policy.allow_anonymous_requester {
            debug!("proposing peer unknown; answering with the anonymous challenge");
            return Ok((ANONYMOUS_CHALLENGE, Verification::Rejected));
        }
        error!("proposing peer unknown and anonymous requesters are not permitted");
        self.state = AuthState::Failed;
        Ok((REJECTED_CHALLENGE, Verification::Rejected))
    }

    /// Builds AUTHREPLY data: step 2 on the responder (`from_responder`),
    /// step 5 on the requester.
    pub(crate) fn reply_data(
        &mut self,
        outbound: &SymmetricSession,
        from_responder: bool,
        good_challenge: bool,
    ) -> Result<([u8; AUTH_REPLY_LEN], Verification), ProtocolError> {
        match (from_responder, self.state) {
            (true, AuthState::Challenge1 { peer_key }) => {
                self.state = AuthState::Reply1 { peer_key };
            }
            (false, AuthState::Challenge2 { peer_key }) => {
                self.state = AuthState::Reply2 { peer_key };
            }
            _ => return Err(self.sequence_failure("building AUTHREPLY")),
        }
        let session_id = self.established_id(outbound, "building AUTHREPLY")?;

        if good_challenge {
            let own = self.store.own_identity();
            let secret = self.store.private_key(&own).ok_or_else(|| {
                error!("identity private key unavailable");
                self.fail(ProtocolError::UnknownPeer("the local identity".to_owned()))
            })?;
            let signature = self.ctx.sign_digest(session_id.as_bytes(), &secret);
            return Ok((signature, Verification::Passed));
        }

        if !from_responder && self.policy.allow_anonymous_requester {
            // The responder did not recognize us; offer our identity key
            // in the reply slot instead of a signature.
            let mut buf = [0_u8; AUTH_REPLY_LEN];
            buf[..PUBLIC_KEY_LEN].copy_from_slice(&self.store.own_identity().serialize());
            debug!("offering own identity key in anonymous AUTHREPLY");
            return Ok((buf, Verification::Passed));
        }

        error!("challenge unverified and no anonymous fallback applies");
        self.state = AuthState::Failed;
        Ok(([0_u8; AUTH_REPLY_LEN], Verification::Rejected))
    }

    /// Builds AUTHPROPOSE data (step 3, requester only).
    pub(crate) fn propose_data(
        &mut self,
        outbound: &SymmetricSession,
    ) -> Result<[u8; AUTH_PROPOSE_LEN], ProtocolError> {
        let AuthState::Reply1 { peer_key } = self.state else {
            return Err(self.sequence_failure("building AUTHPROPOSE"));
        };
        self.state = AuthState::Propose { peer_key };
        let session_id = self.established_id(outbound, "building AUTHPROPOSE")?;
        Ok(auth_hash(&session_id, PROPOSE_TAG, &self.store.own_identity()))
    }

    /// Processes an incoming AUTHCHALLENGE: step 1 on the responder
    /// (`from_requester`), step 4 on the requester.
    pub(crate) fn process_challenge(
        &mut self,
        inbound: &SymmetricSession,
        payload: &[u8],
        from_requester: bool,
    ) -> Result<Verification, ProtocolError> {
        let payload: [u8; AUTH_CHALLENGE_LEN] = exact_bytes("AUTHCHALLENGE", payload)
            .map_err(|mismatch| self.fail(mismatch.into()))?;

        let tag = if from_requester {
            if matches!(self.state, AuthState::Failed) {
                return Err(ProtocolError::SequenceViolation {
                    operation: "restarting a failed authentication handshake",
                });
            }
            self.state = AuthState::Challenge1 { peer_key: None };
            CHALLENGE1_TAG
        } else {
            let AuthState::Propose { peer_key } = self.state else {
                return Err(self.sequence_failure("processing AUTHCHALLENGE (step 4)"));
            };
            self.state = AuthState::Challenge2 { peer_key };
            CHALLENGE2_TAG
        };

        let session_id = self.established_id(inbound, "processing AUTHCHALLENGE")?;
        let expected = auth_hash(&session_id, tag, &self.store.own_identity());
        if payload == expected {
            return Ok(Verification::Passed);
        }

        if !from_requester && payload == ANONYMOUS_CHALLENGE {
            if self.policy.allow_anonymous_requester {
                debug!("responder accepted us anonymously");
                return Ok(Verification::Rejected);
            }
            return Err(self.fail(ProtocolError::AnonymousNotPermitted));
        }

        error!("AUTHCHALLENGE hash does not verify");
        self.state = AuthState::Failed;
        Ok(Verification::Rejected)
    }

    /// Processes an incoming AUTHREPLY: step 2 on the requester
    /// (`from_responder`), step 5 on the responder. `good_challenge`
    /// reports whether the challenge this reply answers had verified.
    pub(crate) fn process_reply(
        &mut self,
        inbound: &SymmetricSession,
        payload: &[u8],
        from_responder: bool,
        good_challenge: bool,
    ) -> Result<Verification, ProtocolError> {
        let payload: [u8; AUTH_REPLY_LEN] =
            exact_bytes("AUTHREPLY", payload).map_err(|mismatch| self.fail(mismatch.into()))?;

        let peer_key = match (from_responder, self.state) {
            (true, AuthState::Challenge1 { peer_key }) => {
                self.state = AuthState::Reply1 { peer_key };
                peer_key
            }
            (false, AuthState::Challenge2 { peer_key }) => {
                self.state = AuthState::Reply2 { peer_key };
                peer_key
            }
            _ => return Err(self.sequence_failure("processing AUTHREPLY")),
        };
        let session_id = self.established_id(inbound, "processing AUTHREPLY")?;

        let verified = peer_key
            .is_some_and(|key| self.ctx.verify_digest(session_id.as_bytes(), &payload, &key));
        if verified {
            return Ok(Verification::Passed);
        }

        if !from_responder && !good_challenge && self.policy.allow_anonymous_requester {
            // Anonymous flow: the reply carries the requester's identity
            // key instead of a signature. Adopt it so the identity rekey
            // still binds the channel to a concrete key.
            let offered = PublicKey::from_slice(&payload[..PUBLIC_KEY_LEN])
                .map_err(|_| self.fail(ProtocolError::InvalidPeerKey))?;
            debug!("adopting anonymously offered requester identity");
            self.state = AuthState::Reply2 {
                peer_key: Some(offered),
            };
            return Ok(Verification::Passed);
        }

        error!("AUTHREPLY signature does not verify");
        self.state = AuthState::Failed;
        Ok(Verification::Rejected)
    }

    /// Processes an incoming AUTHPROPOSE (step 3, responder only),
    /// scanning the authorized key set for the identity that reproduces
    /// the hash.
    pub(crate) fn process_propose(
        &mut self,
        inbound: &SymmetricSession,
        payload: &[u8],
    ) -> Result<Verification, ProtocolError> {
        let payload: [u8; AUTH_PROPOSE_LEN] =
            exact_bytes("AUTHPROPOSE", payload).map_err(|mismatch| self.fail(mismatch.into()))?;

        let AuthState::Reply1 { peer_key } = self.state else {
            return Err(self.sequence_failure("processing AUTHPROPOSE"));
        };
        self.state = AuthState::Propose { peer_key };
        let session_id = self.established_id(inbound, "processing AUTHPROPOSE")?;

        for key in self.store.authorized_keys() {
            if auth_hash(&session_id, PROPOSE_TAG, &key) == payload {
                debug!("AUTHPROPOSE matched an authorized key");
                self.state = AuthState::Propose {
                    peer_key: Some(key),
                };
                return Ok(Verification::Passed);
            }
        }

        if self.policy.allow_anonymous_requester {
            debug!("no authorized key matches AUTHPROPOSE; continuing anonymously");
            self.state = AuthState::Propose { peer_key: None };
            return Ok(Verification::Rejected);
        }
        error!("no authorized key matches AUTHPROPOSE");
        Err(self.fail(ProtocolError::UnknownPeer(
            "the proposing requester".to_owned(),
        )))
    }

    /// Performs the identity rekey on both sessions and moves to
    /// `Success`. Legal only once the final reply has been exchanged and
    /// a peer identity is pinned.
    pub(crate) fn finalize(
        &mut self,
        inbound: &mut SymmetricSession,
        outbound: &mut SymmetricSession,
    ) -> Result<(), ProtocolError> {
        let AuthState::Reply2 {
            peer_key: Some(peer),
        } = self.state
        else {
            return Err(self.sequence_failure("finalizing authentication"));
        };
        let own = self.store.own_identity().serialize();
        let peer_bytes = peer.serialize();

        // Both sides must mix in the *pre-rekey* key material of the
        // opposite channel, so the outbound session rekeys first against
        // the inbound keys, and the inbound session against a snapshot of
        // the outbound keys.
        let outbound_old = outbound.key_set()?.clone();
        let inbound_keys = inbound.key_set()?.clone();
        outbound.rekey(crate::session::RekeyMode::BindIdentities {
            opposite: &inbound_keys,
            sender_identity: own,
            receiver_identity: peer_bytes,
        })?;
        inbound.rekey(crate::session::RekeyMode::BindIdentities {
            opposite: &outbound_old,
            sender_identity: peer_bytes,
            receiver_identity: own,
        })?;

        self.state = AuthState::Success { peer_key: peer };
        debug!(peer = %hex::encode(peer_bytes), "authentication complete; channel rebound to identities");
        Ok(())
    }

    fn established_id(
        &mut self,
        session: &SymmetricSession,
        operation: &'static str,
    ) -> Result<SessionId, ProtocolError> {
        if !session.handshake_complete() {
            return Err(self.fail(ProtocolError::SequenceViolation { operation }));
        }
        session
            .session_id()
            .copied()
            .ok_or_else(|| self.fail(ProtocolError::SequenceViolation { operation }))
    }

    fn sequence_failure(&mut self, operation: &'static str) -> ProtocolError {
        self.fail(ProtocolError::SequenceViolation { operation })
    }

    fn fail(&mut self, error: ProtocolError) -> ProtocolError {
        self.state = AuthState::Failed;
        error
    }
}

impl core::fmt::Debug for AuthHandshake {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AuthHandshake")
            .field("stage", &self.stage())
            .finish_non_exhaustive()
    }
}

/// SHA256d(session_id || tag || compressed key) — the commitment sent in
/// AUTHCHALLENGE and AUTHPROPOSE messages.
fn auth_hash(session_id: &SessionId, tag: u8, key: &PublicKey) -> [u8; 32] {
    kdf::sha256d(&[session_id.as_bytes(), &[tag], &key.serialize()])
}

#[cfg(test)]
mod tests {
    use rand::thread_rng;
    use tradelink_primitives::CipherSuite;

    use super::*;

    fn keyed_inbound() -> eyre::Result<(Arc<CryptoContext>, SymmetricSession)> {
        let ctx = Arc::new(CryptoContext::new());
        let mut session =
            SymmetricSession::new(Arc::clone(&ctx), crate::session::Direction::Inbound);
        let (_, peer) = ctx.generate_keypair(&mut thread_rng());
        session.set_cipher_suite(CipherSuite::ChaCha20Poly1305);
        session.compute_shared_secret(&peer.serialize())?;
        session.mark_encinit_seen();
        session.mark_encack_seen();
        Ok((ctx, session))
    }

    fn handshake(ctx: &Arc<CryptoContext>) -> AuthHandshake {
        let (sk, pk) = ctx.generate_keypair(&mut thread_rng());
        let store = crate::peers::InMemoryPeerKeys::new(sk, pk);
        AuthHandshake::new(
            Arc::clone(ctx),
            Arc::new(store),
            HandshakePolicy::default(),
        )
    }

    #[test]
    fn propose_out_of_order_is_a_sequence_violation() -> eyre::Result<()> {
        let (ctx, inbound) = keyed_inbound()?;
        let mut auth = handshake(&ctx);

        // Still Inactive: a PROPOSE is two steps early.
        let result = auth.process_propose(&inbound, &[0_u8; AUTH_PROPOSE_LEN]);
        assert!(matches!(
            result,
            Err(ProtocolError::SequenceViolation { .. })
        ));
        assert_eq!(auth.stage(), AuthStage::Failed);
        Ok(())
    }

    #[test]
    fn failed_machine_stays_failed() -> eyre::Result<()> {
        let (ctx, inbound) = keyed_inbound()?;
        let mut auth = handshake(&ctx);

        let _ = auth.process_propose(&inbound, &[0_u8; AUTH_PROPOSE_LEN]);
        assert_eq!(auth.stage(), AuthStage::Failed);

        // Even the handshake-opening messages are refused now.
        let restart = auth.process_challenge(&inbound, &[0_u8; AUTH_CHALLENGE_LEN], true);
        assert!(matches!(
            restart,
            Err(ProtocolError::SequenceViolation { .. })
        ));
        Ok(())
    }

    #[test]
    fn undersized_payloads_are_size_errors() -> eyre::Result<()> {
        let (ctx, inbound) = keyed_inbound()?;
        let mut auth = handshake(&ctx);

        let result = auth.process_challenge(&inbound, &[0_u8; 31], true);
        assert!(matches!(result, Err(ProtocolError::SizeMismatch(_))));
        assert_eq!(auth.stage(), AuthStage::Failed);
        Ok(())
    }

    #[test]
    fn fingerprint_is_stable_and_base58() {
        let ctx = Arc::new(CryptoContext::new());
        let auth = handshake(&ctx);
        let fingerprint = auth.fingerprint();
        assert_eq!(fingerprint, auth.fingerprint());
        assert!(!fingerprint.is_empty());
        assert!(bs58::decode(&fingerprint).with_check(None).into_vec().is_ok());
    }
}
