//! node transport and wire types
//!
//! one trait per concern: `NodeApi` is the http surface of a signer node
//! (sign + watch). the reqwest implementation ships here; ceremonies only
//! ever see the trait so tests can script node behavior.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::Signer;
use crate::error::NodeError;

/// signing request to one node
///
/// `signature` covers the canonical digest of the remaining fields and is
/// produced under the caller's scalar secret
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignRequest {
    /// caller-generated unique id, fresh per attempt
    pub id: String,
    /// hex encoded public key of the signing identity
    pub identity: String,
    /// hex encoded ephemeral seed shared with the node
    pub ephemeral: String,
    /// hex encoded watcher fingerprint
    pub watcher: String,
    /// anti-replay nonce, strictly increasing across retries
    pub nonce: u64,
    /// how far in the past or future a nonce is acceptable, nanoseconds
    pub grace: u64,
    /// hex encoded assignee payload (public key + self signature),
    /// present only when re-keying this node to a new identity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    /// hex encoded request signature
    pub signature: String,
}

/// signed portion of a node's signing response
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignResponseData {
    /// hex encoded ciphertext holding the partial signature
    pub cipher: String,
}

/// successful signing response envelope
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignResponse {
    pub data: SignResponseData,
    /// hex encoded node signature over the serialized `data`
    pub signature: String,
}

/// counter query, carries no secret material beyond the watcher
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WatchRequest {
    /// hex encoded watcher fingerprint
    pub watcher: String,
}

/// counter response; negative values are invalid
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WatchResponse {
    pub counter: i64,
}

#[derive(Clone, Debug, Deserialize)]
struct NodeErrorBody {
    code: u16,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct RawSignResponse {
    error: Option<NodeErrorBody>,
    data: Option<SignResponseData>,
    signature: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawWatchResponse {
    error: Option<NodeErrorBody>,
    counter: Option<i64>,
}

/// http surface of a signer node
#[async_trait]
pub trait NodeApi: Send + Sync {
    async fn sign(
        &self,
        signer: &Signer,
        request: &SignRequest,
        timeout: Duration,
    ) -> Result<SignResponse, NodeError>;

    async fn watch(
        &self,
        signer: &Signer,
        request: &WatchRequest,
        timeout: Duration,
    ) -> Result<WatchResponse, NodeError>;
}

/// reqwest-backed transport
pub struct HttpNodeApi {
    http: reqwest::Client,
}

impl HttpNodeApi {
    pub fn new() -> Self {
        Self { http: reqwest::Client::new() }
    }
}

impl Default for HttpNodeApi {
    fn default() -> Self {
        Self::new()
    }
}

fn transport(err: reqwest::Error) -> NodeError {
    NodeError::Transport(err.to_string())
}

#[async_trait]
impl NodeApi for HttpNodeApi {
    async fn sign(
        &self,
        signer: &Signer,
        request: &SignRequest,
        timeout: Duration,
    ) -> Result<SignResponse, NodeError> {
        let response = self
            .http
            .post(format!("{}/sign", signer.api_url))
            .timeout(timeout)
            .json(request)
            .send()
            .await
            .map_err(transport)?;
        let status = response.status();
        let body = response.bytes().await.map_err(transport)?;

        let raw: RawSignResponse = serde_json::from_slice(&body)
            .map_err(|e| NodeError::Transport(format!("undecodable response: {e}")))?;
        if let Some(error) = raw.error {
            return Err(NodeError::Response { code: error.code, message: error.description });
        }
        match (raw.data, raw.signature) {
            (Some(data), Some(signature)) => Ok(SignResponse { data, signature }),
            _ if !status.is_success() => Err(NodeError::Response {
                code: status.as_u16(),
                message: status.canonical_reason().unwrap_or_default().to_string(),
            }),
            _ => Err(NodeError::Transport("incomplete response envelope".into())),
        }
    }

    async fn watch(
        &self,
        signer: &Signer,
        request: &WatchRequest,
        timeout: Duration,
    ) -> Result<WatchResponse, NodeError> {
        let response = self
            .http
            .post(format!("{}/watch", signer.api_url))
            .timeout(timeout)
            .json(request)
            .send()
            .await
            .map_err(transport)?;
        let status = response.status();
        let body = response.bytes().await.map_err(transport)?;

        let raw: RawWatchResponse = serde_json::from_slice(&body)
            .map_err(|e| NodeError::Transport(format!("undecodable response: {e}")))?;
        if let Some(error) = raw.error {
            return Err(NodeError::Response { code: error.code, message: error.description });
        }
        match raw.counter {
            Some(counter) => Ok(WatchResponse { counter }),
            None if !status.is_success() => Err(NodeError::Response {
                code: status.as_u16(),
                message: status.canonical_reason().unwrap_or_default().to_string(),
            }),
            None => Err(NodeError::Transport("incomplete response envelope".into())),
        }
    }
}
