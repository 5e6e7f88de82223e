//! The narrow contract this crate has on the application's peer-key
//! persistence, plus an in-memory implementation for tests and simple
//! deployments.

use std::collections::{BTreeMap, BTreeSet};

use secp256k1::{PublicKey, SecretKey};

/// Lookup interface over the authorized-peers database.
///
/// The store outlives any one connection; connections only read from it.
/// Peer names are whatever the application keys its peers by — an
/// `ip:port` pair for direct links, a hostname or onion address
/// otherwise.
pub trait PeerKeyStore {
    /// The identity key registered for a named peer, if any.
    fn public_key(&self, name: &str) -> Option<PublicKey>;

    /// The private half of a local identity key.
    fn private_key(&self, public: &PublicKey) -> Option<SecretKey>;

    /// Every peer identity key this endpoint will authenticate.
    fn authorized_keys(&self) -> BTreeSet<PublicKey>;

    /// This endpoint's own identity key.
    fn own_identity(&self) -> PublicKey;
}

/// A peer-key store held entirely in memory.
pub struct InMemoryPeerKeys {
    identity_secret: SecretKey,
    identity_public: PublicKey,
    peers: BTreeMap<String, PublicKey>,
}

impl InMemoryPeerKeys {
    #[must_use]
    pub fn new(identity_secret: SecretKey, identity_public: PublicKey) -> Self {
        Self {
            identity_secret,
            identity_public,
            peers: BTreeMap::new(),
        }
    }

    /// Registers (or replaces) the identity key for a named peer.
    pub fn add_peer(&mut self, name: impl Into<String>, key: PublicKey) {
        let _ = self.peers.insert(name.into(), key);
    }

    /// Drops a named peer. Stale names must be erased before a key
    /// rotation re-adds them.
    pub fn remove_peer(&mut self, name: &str) {
        let _ = self.peers.remove(name);
    }
}

impl PeerKeyStore for InMemoryPeerKeys {
    fn public_key(&self, name: &str) -> Option<PublicKey> {
        self.peers.get(name).copied()
    }

    fn private_key(&self, public: &PublicKey) -> Option<SecretKey> {
        (*public == self.identity_public).then_some(self.identity_secret)
    }

    fn authorized_keys(&self) -> BTreeSet<PublicKey> {
        self.peers.values().copied().collect()
    }

    fn own_identity(&self) -> PublicKey {
        self.identity_public
    }
}

impl core::fmt::Debug for InMemoryPeerKeys {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryPeerKeys")
            .field("identity", &self.identity_public)
            .field("peers", &self.peers.len())
            .finish_non_exhaustive()
    }
}
