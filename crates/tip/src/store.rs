//! secret store capability
//!
//! the surrounding application keeps the pin token, session secret,
//! cached seeds and the sealed aggregate in a platform secure store. the
//! core only sees this trait; the in-memory implementation backs tests
//! and development.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crate::{Error, Result};

/// well-known store keys
pub mod keys {
    /// token bound to the account, decrypts server-held seeds
    pub const PIN_TOKEN: &str = "pin_token";
    /// session private key for account-service proofs
    pub const SESSION_SECRET: &str = "session_secret";
    /// sealed aggregate signature
    pub const TIP_PRIV: &str = "tip_priv";
    /// cached ephemeral seed
    pub const EPHEMERAL_SEED: &str = "ephemeral_seed";
    /// cached identity seed
    pub const IDENTITY_SEED: &str = "identity_seed";
}

/// namespaced storage for small secret blobs
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// monotonic counter for encrypted pin blobs; returns the current
    /// value and advances it
    async fn next_iterator(&self) -> Result<u64>;
}

/// in-memory store, NOT durable - for tests and development
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
    iterator: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            iterator: AtomicU64::new(0),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecretStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.read().map_err(|e| Error::Store(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut entries = self.entries.write().map_err(|e| Error::Store(e.to_string()))?;
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().map_err(|e| Error::Store(e.to_string()))?;
        entries.remove(key);
        Ok(())
    }

    async fn next_iterator(&self) -> Result<u64> {
        Ok(self.iterator.fetch_add(1, Ordering::SeqCst))
    }
}
