//! Bytestream auth token
//!
//! Both parties derive the same token as
//! `SHA1(session_id ∥ initiator_identity ∥ target_identity)`. The token's
//! lowercase hex rendering is sent as the SOCKS5 CONNECT domain name and is
//! the only thing tying an anonymous inbound connection to a transfer.

use std::fmt;

use sha1::{Digest, Sha1};

/// Length of the raw digest in bytes
pub const TOKEN_LENGTH: usize = 20;

/// Length of the canonical hex rendering
pub const TOKEN_HEX_LENGTH: usize = TOKEN_LENGTH * 2;

/// SHA-1 digest identifying one bytestream session between two identities
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct AuthToken([u8; TOKEN_LENGTH]);

impl AuthToken {
    /// Derive the token for a session
    ///
    /// The argument order is fixed by role, never by which side computes it:
    /// the initiator is always the party that offered the streamhosts.
    #[must_use]
    pub fn compute(session_id: &str, initiator: &str, target: &str) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(session_id.as_bytes());
        hasher.update(initiator.as_bytes());
        hasher.update(target.as_bytes());
        Self(hasher.finalize().into())
    }

    /// Wrap a raw digest
    #[must_use]
    pub fn from_bytes(bytes: [u8; TOKEN_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; TOKEN_LENGTH] {
        &self.0
    }

    /// Canonical rendering used on the wire (40 lowercase hex digits)
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a claimed token from its wire rendering
    ///
    /// Only the exact canonical form is accepted; uppercase digits or any
    /// other length never match a token we issued.
    #[must_use]
    pub fn parse(claim: &str) -> Option<Self> {
        if claim.len() != TOKEN_HEX_LENGTH
            || !claim
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return None;
        }
        let mut bytes = [0u8; TOKEN_LENGTH];
        hex::decode_to_slice(claim, &mut bytes).ok()?;
        Some(Self(bytes))
    }

    /// Shortened rendering for log lines
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthToken({}…)", self.short())
    }
}
