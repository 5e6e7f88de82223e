use core::fmt;

use crate::wire::SESSION_ID_LEN;

/// Identifier of one directional session, derived once from the ECDH
/// shared secret and immutable afterwards.
///
/// The ID doubles as channel-binding material: authentication hashes and
/// signatures during the handshake commit to it.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct SessionId([u8; SESSION_ID_LEN]);

impl SessionId {
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; SESSION_ID_LEN] {
        &self.0
    }
}

impl From<[u8; SESSION_ID_LEN]> for SessionId {
    fn from(bytes: [u8; SESSION_ID_LEN]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_as_hex() {
        let mut bytes = [0_u8; SESSION_ID_LEN];
        bytes[0] = 0xAB;
        bytes[31] = 0x01;
        let id = SessionId::from(bytes);
        let rendered = id.to_string();
        assert!(rendered.starts_with("ab"));
        assert!(rendered.ends_with("01"));
        assert_eq!(rendered.len(), SESSION_ID_LEN * 2);
    }
}
