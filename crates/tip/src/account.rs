//! account service capability
//!
//! the account service records the published tip public key and counter,
//! escrows the identity seed and the local storage key. every call here
//! is fatal on failure - the signing ceremony itself is never repeated
//! because an account call failed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// account record as the service reports it
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Account {
    pub user_id: String,
    /// epoch counter committed with the last successful key update
    pub tip_counter: u64,
    /// published tip public key, empty before the first establish
    #[serde(default)]
    pub tip_key: Vec<u8>,
    /// whether a legacy (pre-tip) pin exists on the account
    #[serde(default)]
    pub has_pin: bool,
}

/// pin update submission
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PinRequest {
    /// encrypted new public key and counter
    pub pin: String,
    /// encrypted proof of the previous credential: a legacy pin on first
    /// establish, a signature under the previous key on rotation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_pin: Option<String>,
}

/// storage-key escrow submission
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SecretUpdateRequest {
    /// encrypted storage key, base64
    pub seed: String,
    /// encrypted session public key, base64
    pub secret: String,
    /// base64 session signature over the canonical timestamp body
    pub signature: String,
    /// nanosecond timestamp the signature covers
    pub timestamp: u64,
}

/// storage-key escrow read
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SecretReadRequest {
    /// base64 session signature over the canonical timestamp body
    pub signature: String,
    /// nanosecond timestamp the signature covers
    pub timestamp: u64,
}

/// account-management surface consumed by the orchestrator
///
/// implementations are expected to reflect the record returned by
/// `update_pin` in subsequent `current` calls.
#[async_trait]
pub trait AccountClient: Send + Sync {
    /// the account as last known, if signed in
    async fn current(&self) -> Result<Option<Account>>;

    /// identity seed escrowed for this account, base64 of the
    /// pin-token-encrypted seed
    async fn identity_seed(&self) -> Result<String>;

    /// publish a new pin credential; returns the updated record
    async fn update_pin(&self, request: PinRequest) -> Result<Account>;

    /// escrow the encrypted local storage key
    async fn update_secret(&self, request: SecretUpdateRequest) -> Result<()>;

    /// read back the escrowed storage key, base64 encrypted
    async fn read_secret(&self, request: SecretReadRequest) -> Result<String>;
}

/// canonical body for account-service proof signatures
pub(crate) fn verify_body(value: u64) -> Vec<u8> {
    format!("TIP:VERIFY:{value:032}").into_bytes()
}
