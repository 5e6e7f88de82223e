//! Per-connection policy, supplied at construction.
//!
//! These are plain values the application resolves from its
//! configuration file and passes into every
//! [`crate::EncryptedConnection`]; nothing here is read from mutable
//! global state.

use serde::{Deserialize, Serialize};

/// Which transport family the link runs over. Informational for the
/// handshake itself; applications use it to key peer names consistently.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportHint {
    #[default]
    Ipv4,
    Ipv6,
    /// Hidden-service transport; peer names are onion addresses.
    Onion,
}

/// Immutable authentication policy for one connection.
#[derive(Copy, Clone, Debug, Default, Serialize, Deserialize)]
pub struct HandshakePolicy {
    #[serde(default)]
    pub transport: TransportHint,

    /// When true, a responder accepts requesters whose identity key is
    /// not in the authorized set, and a requester accepts the anonymous
    /// challenge sentinel from a responder. The responder's own identity
    /// is always verified; this never weakens that direction.
    #[serde(default)]
    pub allow_anonymous_requester: bool,
}

impl HandshakePolicy {
    /// Strict mutual authentication over the given transport.
    #[must_use]
    pub fn strict(transport: TransportHint) -> Self {
        Self {
            transport,
            allow_anonymous_requester: false,
        }
    }
}
