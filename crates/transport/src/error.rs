//! Error taxonomy of the transport core.
//!
//! Every failure is a kind, not a message: callers branch on the variant
//! to decide whether a fresh handshake is worth attempting (it never is
//! for the same connection object — all of these leave the connection
//! untrusted).

use thiserror::Error;
use tradelink_crypto::AeadError;
use tradelink_primitives::suite::UnsupportedCipherSuite;
use tradelink_primitives::SizeMismatch;

/// Fatal protocol failures.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// A fixed-length wire field had the wrong size.
    #[error(transparent)]
    SizeMismatch(#[from] SizeMismatch),

    /// The peer's public key is not a valid compressed curve point.
    #[error("peer public key is not a valid compressed secp256k1 point")]
    InvalidPeerKey,

    /// The peer offered a cipher-suite byte this build does not support.
    #[error(transparent)]
    UnsupportedCipherSuite(#[from] UnsupportedCipherSuite),

    /// A cryptographic operation failed outright (as opposed to a
    /// verification that ran and rejected, which is a [`Verification`]).
    #[error("cryptographic operation failed: {0}")]
    CryptoFailure(#[from] AeadError),

    /// A message arrived (or an operation was requested) while the state
    /// machine is not in the state that expects it.
    #[error("{operation} is not legal in the current protocol state")]
    SequenceViolation { operation: &'static str },

    /// A key-store lookup missed where a known identity is mandatory.
    #[error("no identity key known for {0}")]
    UnknownPeer(String),

    /// The peer fell back to anonymous authentication but local policy
    /// forbids anonymous peers.
    #[error("peer offered anonymous authentication but local policy forbids it")]
    AnonymousNotPermitted,
}

/// Decryption failures, kept separate from [`ProtocolError`] because the
/// transport layer handles them on the per-packet path.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DecryptError {
    /// The session has not completed key agreement.
    #[error("session keys are not established")]
    NotReady,

    /// See [`AeadError`] for the cipher-level kinds (length overrun,
    /// authentication failure, truncation).
    #[error(transparent)]
    Cipher(#[from] AeadError),
}

/// Outcome of an authentication verification step that ran to completion.
///
/// `Rejected` means the message was well-formed but did not verify; the
/// handshake tolerates that only on the steps where the anonymous-peer
/// fallback applies. Everything the machine could not even attempt is a
/// [`ProtocolError`] instead.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[must_use]
pub enum Verification {
    Passed,
    Rejected,
}

impl Verification {
    #[must_use]
    pub const fn is_passed(self) -> bool {
        matches!(self, Self::Passed)
    }
}
