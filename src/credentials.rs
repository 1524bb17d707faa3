//! Credential identifiers.
//!
//! Accounts, devices and secrets travel as 63-bit integers derived from
//! passphrases: SHA-256 of the UTF-8 text, the four big-endian 64-bit words
//! XORed together, top bit cleared.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::protocol::AuthenticateRequest;

/// Fold the SHA-256 digest of `phrase` into 64 bits.
pub fn hash64(phrase: &str) -> u64 {
    let digest = Sha256::digest(phrase.as_bytes());
    digest
        .chunks_exact(8)
        .map(|word| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(word);
            u64::from_be_bytes(buf)
        })
        .fold(0, |acc, word| acc ^ word)
}

/// [`hash64`] masked to a non-negative 63-bit value.
pub fn hash63(phrase: &str) -> i64 {
    (hash64(phrase) & 0x7FFF_FFFF_FFFF_FFFF) as i64
}

/// User, device and secret identifiers sent on authenticate.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Credentials {
    pub user_id: i64,
    pub device_id: i64,
    pub secret: i64,
}

impl Credentials {
    pub fn new(user_id: i64, device_id: i64, secret: i64) -> Self {
        Self {
            user_id,
            device_id,
            secret,
        }
    }

    /// Derive all three identifiers from passphrases with [`hash63`].
    pub fn from_phrases(account: &str, device: &str, secret: &str) -> Self {
        Self::new(hash63(account), hash63(device), hash63(secret))
    }

    pub(crate) fn to_request(self) -> AuthenticateRequest {
        AuthenticateRequest {
            user_id: self.user_id,
            device_id: self.device_id,
            secret: self.secret,
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user_id", &self.user_id)
            .field("device_id", &self.device_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}
