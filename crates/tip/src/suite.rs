//! threshold suite trait
//!
//! the pairing curve arithmetic behind the protocol (scalar public keys,
//! partial signature verification, shamir-style recovery) lives in an
//! external library. this trait is the exact surface the client consumes;
//! implementations wrap that library, tests substitute a deterministic
//! fake.

use crate::identity::IdentitySecret;
use crate::Result;

/// black-box pairing crypto consumed by the signing core
///
/// all inputs and outputs are raw bytes; encodings (hex on the wire,
/// base58 node identities) are handled by the caller.
pub trait ThresholdSuite: Send + Sync {
    /// public key bytes for a scalar secret
    ///
    /// must be deterministic: the same secret always yields the same key
    fn user_public(&self, secret: &IdentitySecret) -> Result<Vec<u8>>;

    /// sign a message under a scalar secret
    fn sign(&self, secret: &IdentitySecret, message: &[u8]) -> Result<Vec<u8>>;

    /// verify a node's signature over `message` against its base58
    /// identity; errors mean a corrupted or hostile response
    fn verify_node(&self, identity: &str, message: &[u8], signature: &[u8]) -> Result<()>;

    /// decrypt a node response cipher with the shared secret between the
    /// local scalar and the node's public identity
    fn decrypt(&self, secret: &IdentitySecret, identity: &str, cipher: &[u8]) -> Result<Vec<u8>>;

    /// recover the aggregate signature from partial shares
    ///
    /// preconditions: `partials` all belong to the assignor identified by
    /// `assignor`, `partials.len() >= commitments.len()`, and `total` is
    /// the full signer count N. postcondition: 64 signature bytes.
    fn recover_signature(
        &self,
        partials: &[Vec<u8>],
        commitments: &[String],
        assignor: &[u8],
        total: usize,
    ) -> Result<Vec<u8>>;
}
