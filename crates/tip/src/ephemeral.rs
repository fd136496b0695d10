//! ephemeral seed management
//!
//! every sign request carries a shared ephemeral value the node uses to
//! bound replay. the value is cached locally sealed under the pin token
//! and escrowed with an ephemeral registry; it is refreshed roughly every
//! grace period.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use tracing::info;

use crate::crypto;
use crate::store::{keys, SecretStore};
use crate::{Error, Result};

/// how far in the past or future a node accepts a nonce: 128 days,
/// nanoseconds
pub const EPHEMERAL_GRACE: u64 = 128 * 24 * 60 * 60 * 1_000_000_000;

const EPHEMERAL_SEED_LEN: usize = 32;

/// registry escrowing the encrypted ephemeral seed server-side
#[async_trait]
pub trait EphemeralRegistry: Send + Sync {
    /// newest escrowed value, base64 of the pin-token-sealed seed
    async fn latest(&self) -> Result<Option<String>>;

    /// (re)publish an escrowed value
    async fn publish(&self, encoded: &str) -> Result<()>;
}

/// resolve the ephemeral seed: local cache, then registry, then a fresh
/// random seed published to the registry
pub(crate) async fn resolve(
    store: &dyn SecretStore,
    registry: &dyn EphemeralRegistry,
    pin_token: &[u8],
) -> Result<Vec<u8>> {
    if let Some(seed) = store.get(keys::EPHEMERAL_SEED).await? {
        info!("using cached ephemeral seed");
        return Ok(seed);
    }

    if let Some(encoded) = registry.latest().await? {
        let sealed = URL_SAFE_NO_PAD
            .decode(&encoded)
            .map_err(|e| Error::Ephemeral(format!("undecodable escrow value: {e}")))?;
        let seed = crypto::open(pin_token, &sealed)?;
        registry.publish(&encoded).await?;
        store.put(keys::EPHEMERAL_SEED, &seed).await?;
        info!("using escrowed ephemeral seed");
        return Ok(seed);
    }

    let seed = crypto::random_bytes::<EPHEMERAL_SEED_LEN>();
    let sealed = crypto::seal(pin_token, &seed)?;
    registry.publish(&URL_SAFE_NO_PAD.encode(sealed)).await?;
    store.put(keys::EPHEMERAL_SEED, &seed).await?;
    info!("generated fresh ephemeral seed");
    Ok(seed.to_vec())
}
