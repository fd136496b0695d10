//! per-node signing call
//!
//! builds and signs one request, sends it, authenticates and decrypts the
//! response, and parses the fixed-layout plaintext into a partial
//! signature, an assignor fingerprint and the node's epoch counter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::api::{NodeApi, SignRequest};
use crate::config::Signer;
use crate::error::NodeError;
use crate::identity::{IdentitySecret, Watcher};
use crate::suite::ThresholdSuite;

/// decrypted sign responses have exactly this many bytes:
/// 8 header, 66 partial, 128 assignor, 8 reserved, 8 counter
pub(crate) const RESPONSE_PLAIN_LEN: usize = 218;

const PARTIAL_START: usize = 8;
const PARTIAL_END: usize = PARTIAL_START + 66;
const ASSIGNOR_START: usize = PARTIAL_END;
const ASSIGNOR_END: usize = ASSIGNOR_START + 128;
const COUNTER_START: usize = RESPONSE_PLAIN_LEN - 8;

/// one node's contribution to a ceremony
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartialSig {
    /// partial signature share
    pub partial: Vec<u8>,
    /// hex fingerprint of the identity the node signed under
    pub assignor: String,
    /// node epoch counter, big endian on the wire
    pub counter: u64,
}

/// synchronized retry budget, one per node call loop
///
/// multiple ceremonies may run concurrently; the counter is atomic so a
/// budget never leaks attempts across loops
pub(crate) struct RetryBudget {
    max: u64,
    value: AtomicU64,
}

impl RetryBudget {
    pub(crate) fn new(max: u64) -> Self {
        Self { max, value: AtomicU64::new(0) }
    }

    /// retries consumed so far
    pub(crate) fn value(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }

    /// consume one retry; false once the budget is exhausted
    pub(crate) fn count_and_validate(&self) -> bool {
        self.value.fetch_add(1, Ordering::SeqCst) + 1 <= self.max
    }
}

/// canonical digest the request signature covers: sha-256 over the
/// length-prefixed request fields
fn request_digest(
    request_id: &str,
    identity: &[u8],
    ephemeral: &[u8],
    watcher: &[u8],
    nonce: u64,
    grace: u64,
    assignee: Option<&[u8]>,
) -> [u8; 32] {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    for field in [
        request_id.as_bytes(),
        identity,
        ephemeral,
        watcher,
        &nonce.to_be_bytes(),
        &grace.to_be_bytes(),
        assignee.unwrap_or(&[]),
    ] {
        hasher.update((field.len() as u32).to_be_bytes());
        hasher.update(field);
    }
    hasher.finalize().into()
}

/// parse the decrypted response plaintext
pub(crate) fn parse_plaintext(plain: &[u8]) -> Result<PartialSig, NodeError> {
    if plain.len() != RESPONSE_PLAIN_LEN {
        return Err(NodeError::MalformedPlaintext(plain.len()));
    }
    let counter_bytes: [u8; 8] = plain[COUNTER_START..]
        .try_into()
        .expect("length checked");
    Ok(PartialSig {
        partial: plain[PARTIAL_START..PARTIAL_END].to_vec(),
        assignor: hex::encode(&plain[ASSIGNOR_START..ASSIGNOR_END]),
        counter: u64::from_be_bytes(counter_bytes),
    })
}

/// issue one signing attempt against one node
#[allow(clippy::too_many_arguments)]
pub(crate) async fn sign_node(
    suite: &dyn ThresholdSuite,
    api: &dyn NodeApi,
    secret: &IdentitySecret,
    signer: &Signer,
    ephemeral: &[u8],
    watcher: &Watcher,
    nonce: u64,
    grace: u64,
    assignee: Option<&[u8]>,
    request_id: &str,
    timeout: Duration,
) -> Result<PartialSig, NodeError> {
    let identity = suite
        .user_public(secret)
        .map_err(|e| NodeError::Crypto(e.to_string()))?;
    let digest = request_digest(
        request_id,
        &identity,
        ephemeral,
        watcher.as_bytes(),
        nonce,
        grace,
        assignee,
    );
    let signature = suite
        .sign(secret, &digest)
        .map_err(|e| NodeError::Crypto(e.to_string()))?;

    let request = SignRequest {
        id: request_id.to_string(),
        identity: hex::encode(&identity),
        ephemeral: hex::encode(ephemeral),
        watcher: watcher.to_hex(),
        nonce,
        grace,
        assignee: assignee.map(hex::encode),
        signature: hex::encode(signature),
    };

    let response = api.sign(signer, &request, timeout).await?;

    // authenticate before touching the payload: a bad signature means a
    // corrupted or hostile response, never retried
    let message = serde_json::to_vec(&response.data)
        .map_err(|e| NodeError::Crypto(e.to_string()))?;
    let response_signature =
        hex::decode(&response.signature).map_err(|_| NodeError::BadResponseSignature)?;
    suite
        .verify_node(&signer.identity, &message, &response_signature)
        .map_err(|_| NodeError::BadResponseSignature)?;

    let cipher = hex::decode(&response.data.cipher).map_err(|_| NodeError::BadCipher)?;
    let plain = suite
        .decrypt(secret, &signer.identity, &cipher)
        .map_err(|_| NodeError::BadCipher)?;

    parse_plaintext(&plain)
}
