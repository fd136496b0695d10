//! identity derivation
//!
//! the server-held seed plus the user's pin yield a reproducible scalar
//! secret; the seed alone yields the watcher fingerprint used for
//! read-only node queries.

use zeroize::Zeroizing;

use crate::crypto::{self, SECRET_LEN};
use crate::{Error, Result};

/// pin-derived scalar secret for one signing ceremony
///
/// never persisted in raw form; the backing buffer is scrubbed on drop
#[derive(Clone)]
pub struct IdentitySecret(Zeroizing<[u8; SECRET_LEN]>);

impl IdentitySecret {
    pub fn new(bytes: [u8; SECRET_LEN]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; SECRET_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for IdentitySecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("IdentitySecret([REDACTED])")
    }
}

/// pin-independent fingerprint of the identity seed
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Watcher([u8; 32]);

impl Watcher {
    pub fn from_seed(seed: &[u8]) -> Self {
        Self(crypto::sha256(seed))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// derive the identity pair from pin bytes and the server seed
///
/// the slow hash is intentionally expensive; callers should derive once
/// per ceremony and drop the secret as soon as the ceremony ends
pub fn derive(pin: &[u8], seed: &[u8]) -> Result<(IdentitySecret, Watcher)> {
    if pin.is_empty() {
        return Err(Error::InvalidPin);
    }
    let secret = crypto::stretch_pin(pin, seed)?;
    Ok((IdentitySecret::new(secret), Watcher::from_seed(seed)))
}
