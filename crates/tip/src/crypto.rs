//! ambient crypto helpers
//!
//! - argon2id for the pin slow hash
//! - chacha20poly1305 for sealing local secrets
//! - sha-256 for fingerprints and canonical digests
//! - sha3-256 for hashing the aggregate into an ed25519 seed
//! - hkdf for the local storage key

use argon2::{Argon2, Params, Version};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::{Digest, Sha256};
use sha3::Sha3_256;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{Error, Result};

/// argon2id cost parameters for the identity secret. memory-hard on
/// purpose: a leaked seed must not make the pin brute-forceable offline.
const ARGON2_M_COST: u32 = 64 * 1024; // 64 MiB
const ARGON2_T_COST: u32 = 4;
const ARGON2_P_COST: u32 = 2;

/// identity secret length, a scalar seed for the threshold suite
pub const SECRET_LEN: usize = 32;

/// stretch a pin into the identity secret, salted with the server seed
pub fn stretch_pin(pin: &[u8], seed: &[u8]) -> Result<[u8; SECRET_LEN]> {
    let params = Params::new(ARGON2_M_COST, ARGON2_T_COST, ARGON2_P_COST, Some(SECRET_LEN))
        .map_err(|e| Error::Crypto(e.to_string()))?;
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params);

    let mut output = [0u8; SECRET_LEN];
    argon2
        .hash_password_into(pin, seed, &mut output)
        .map_err(|e| Error::Crypto(e.to_string()))?;
    Ok(output)
}

/// sha-256
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// sha3-256, used to turn the aggregate signature into an ed25519 seed
pub fn sha3_256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// generate random bytes
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

// tokens handed to us (pin token, storage keys) are opaque blobs; the
// cipher key is always a digest of them so any length is accepted
fn cipher_for(key: &[u8]) -> ChaCha20Poly1305 {
    let key = sha256(key);
    ChaCha20Poly1305::new_from_slice(&key).expect("sha256 output is a valid key")
}

/// seal a secret under a key: random 12-byte nonce prefix plus ciphertext
pub fn seal(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let nonce: [u8; 12] = random_bytes();
    let mut sealed = nonce.to_vec();
    let ciphertext = cipher_for(key)
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| Error::Crypto(e.to_string()))?;
    sealed.extend(ciphertext);
    Ok(sealed)
}

/// open a sealed secret
pub fn open(key: &[u8], sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < 12 {
        return Err(Error::Crypto("sealed data too short".into()));
    }
    let nonce: [u8; 12] = sealed[..12].try_into().expect("length checked");
    cipher_for(key)
        .decrypt(Nonce::from_slice(&nonce), &sealed[12..])
        .map_err(|e| Error::Crypto(e.to_string()))
}

/// derive the key that seals the aggregate signature at rest
pub fn storage_key(aes_key: &[u8], pin: &[u8]) -> Result<[u8; 32]> {
    let mut ikm = Vec::with_capacity(aes_key.len() + pin.len());
    ikm.extend_from_slice(aes_key);
    ikm.extend_from_slice(pin);

    let hk = Hkdf::<Sha256>::new(None, &ikm);
    let mut key = [0u8; 32];
    hk.expand(b"tip:storage:v1", &mut key)
        .map_err(|_| Error::Crypto("storage key derivation failed".into()))?;
    Ok(key)
}

/// seconds since the unix epoch
pub fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// nanoseconds since the unix epoch, for signed account-service bodies
pub fn unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
