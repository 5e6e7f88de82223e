//! Authenticated, encrypted transport between the terminal and its signer.
//!
//! A logical link is one [`EncryptedConnection`]: a pair of unidirectional
//! [`SymmetricSession`]s (one per traffic direction) and one
//! [`AuthHandshake`] layered on top of them. Establishment happens in two
//! phases over whatever ordered, reliable byte channel the caller provides:
//!
//! ```text
//!   requester                                 responder
//!      | -- encinit  (pubkey || suite) ----------> |   \
//!      | <-- encack  (pubkey) --------------------- |    | key agreement
//!      | <-- encinit (pubkey || suite) ------------ |    | (both directions)
//!      | -- encack   (pubkey) --------------------> |   /
//!      | -- AUTHCHALLENGE (hash) -----------------> |   \
//!      | <-- AUTHREPLY    (signature) ------------- |    |
//!      | -- AUTHPROPOSE   (hash) -----------------> |    | mutual
//!      | <-- AUTHCHALLENGE (hash) ----------------- |    | authentication
//!      | -- AUTHREPLY     (signature) ------------> |   /
//!      |     ... identity rekey on both sides ...   |
//! ```
//!
//! After both sides call [`EncryptedConnection::finalize_authentication`],
//! application frames flow through [`EncryptedConnection::assemble_packet`]
//! and [`EncryptedConnection::decrypt_packet`].
//!
//! This crate performs no I/O and spawns nothing. Callers must serialize
//! all calls into a connection; message order on the wire is a correctness
//! requirement because the per-session sequence counter is the AEAD nonce.
//! Any error leaves the connection untrusted: tear it down and renegotiate
//! from the first encinit.

pub mod auth;
pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod peers;
pub mod session;

pub use auth::{AuthHandshake, AuthStage};
pub use config::{HandshakePolicy, TransportHint};
pub use connection::EncryptedConnection;
pub use error::{DecryptError, ProtocolError, Verification};
pub use message::FramedMessage;
pub use peers::{InMemoryPeerKeys, PeerKeyStore};
pub use session::{Direction, RekeyMode, SymmetricSession};
