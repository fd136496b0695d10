//! shared test doubles
//!
//! a deterministic fake of the pairing suite, a scriptable node
//! transport that records every request, and in-memory stand-ins for the
//! registry and account collaborators.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::account::{Account, AccountClient, PinRequest, SecretReadRequest, SecretUpdateRequest};
use crate::api::{NodeApi, SignRequest, SignResponse, SignResponseData, WatchRequest, WatchResponse};
use crate::config::{Signer, TipConfig};
use crate::crypto;
use crate::ephemeral::EphemeralRegistry;
use crate::error::NodeError;
use crate::identity::{IdentitySecret, Watcher};
use crate::node::RESPONSE_PLAIN_LEN;
use crate::suite::ThresholdSuite;
use crate::{Error, Result};

pub(crate) const PIN_TOKEN: &[u8] = b"unit test pin token";

/// registry of seven nodes with a threshold of five
pub(crate) fn test_config() -> TipConfig {
    TipConfig::new(
        (0..5).map(|i| format!("commitment{i}")).collect(),
        (1..=7)
            .map(|index| Signer {
                identity: format!("5TestNodeIdentity{index}"),
                index,
                api_url: format!("http://node{index}.test"),
            })
            .collect(),
    )
    .expect("valid test config")
}

pub(crate) fn test_secret(tag: u8) -> IdentitySecret {
    IdentitySecret::new([tag; 32])
}

pub(crate) fn test_watcher() -> Watcher {
    Watcher::from_seed(b"watch seed")
}

/// keyed xor keystream standing in for the suite's dh cipher
pub(crate) fn xor_stream(key: &[u8; 32], data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut block = [0u8; 32];
    for (i, byte) in data.iter().enumerate() {
        if i % 32 == 0 {
            let mut material = key.to_vec();
            material.extend(((i / 32) as u64).to_be_bytes());
            block = crypto::sha256(&material);
        }
        out.push(byte ^ block[i % 32]);
    }
    out
}

/// deterministic hash-based fake of the pairing suite
pub(crate) struct MockSuite;

impl MockSuite {
    pub(crate) fn shared_key(identity: &str, user_public: &[u8]) -> [u8; 32] {
        let mut material = b"tip:test:dh:".to_vec();
        material.extend(identity.as_bytes());
        material.extend(user_public);
        crypto::sha256(&material)
    }

    pub(crate) fn node_signature(identity: &str, message: &[u8]) -> Vec<u8> {
        let mut material = b"tip:test:node:".to_vec();
        material.extend(identity.as_bytes());
        material.extend(message);
        crypto::sha256(&material).to_vec()
    }
}

impl ThresholdSuite for MockSuite {
    fn user_public(&self, secret: &IdentitySecret) -> Result<Vec<u8>> {
        let mut material = b"tip:test:pub:".to_vec();
        material.extend(secret.as_bytes());
        Ok(crypto::sha256(&material).to_vec())
    }

    fn sign(&self, secret: &IdentitySecret, message: &[u8]) -> Result<Vec<u8>> {
        let mut material = b"tip:test:sig:".to_vec();
        material.extend(secret.as_bytes());
        material.extend(message);
        let h1 = crypto::sha256(&material);
        let h2 = crypto::sha256(&h1);
        Ok([h1.as_slice(), h2.as_slice()].concat())
    }

    fn verify_node(&self, identity: &str, message: &[u8], signature: &[u8]) -> Result<()> {
        if signature == Self::node_signature(identity, message) {
            Ok(())
        } else {
            Err(Error::Suite("node signature mismatch".into()))
        }
    }

    fn decrypt(&self, secret: &IdentitySecret, identity: &str, cipher: &[u8]) -> Result<Vec<u8>> {
        let key = Self::shared_key(identity, &self.user_public(secret)?);
        Ok(xor_stream(&key, cipher))
    }

    fn recover_signature(
        &self,
        partials: &[Vec<u8>],
        commitments: &[String],
        assignor: &[u8],
        total: usize,
    ) -> Result<Vec<u8>> {
        if partials.len() < commitments.len() {
            return Err(Error::Suite("not enough partials".into()));
        }
        // sorted so the result is independent of completion order
        let mut sorted: Vec<&Vec<u8>> = partials.iter().collect();
        sorted.sort();
        let mut material = b"tip:test:agg:".to_vec();
        for partial in sorted {
            material.extend((partial.len() as u32).to_be_bytes());
            material.extend(partial.iter());
        }
        material.extend(assignor);
        for commitment in commitments {
            material.extend(commitment.as_bytes());
        }
        material.extend((total as u64).to_be_bytes());
        let h1 = crypto::sha256(&material);
        let h2 = crypto::sha256(&h1);
        Ok([h1.as_slice(), h2.as_slice()].concat())
    }
}

/// per-node behavior script
#[derive(Clone, Default)]
pub(crate) struct NodeScript {
    /// fail this many sign/watch calls with a transport error first
    transient_failures: u32,
    /// always answer with this error code
    respond_code: Option<u16>,
    /// assignor fingerprint fill byte
    assignor: u8,
    /// epoch counter returned in sign responses
    counter: u64,
    /// corrupt the response signature
    tamper_signature: bool,
    /// watch response value; none means unreachable for watch
    watch_counter: Option<i64>,
}

impl NodeScript {
    pub(crate) fn ok(assignor: u8, counter: u64) -> Self {
        Self { assignor, counter, ..Default::default() }
    }

    pub(crate) fn respond(code: u16) -> Self {
        Self { respond_code: Some(code), ..Default::default() }
    }

    pub(crate) fn unreachable() -> Self {
        Self { transient_failures: u32::MAX, ..Default::default() }
    }

    pub(crate) fn watching(counter: i64) -> Self {
        Self { watch_counter: Some(counter), ..Default::default() }
    }

    pub(crate) fn failing(mut self, times: u32) -> Self {
        self.transient_failures = times;
        self
    }

    pub(crate) fn tampered(mut self) -> Self {
        self.tamper_signature = true;
        self
    }
}

/// one recorded sign request
#[derive(Clone, Debug)]
pub(crate) struct RecordedSign {
    pub index: u32,
    pub id: String,
    pub nonce: u64,
    pub has_assignee: bool,
    /// hex user public key the request was issued under
    pub identity: String,
}

/// scriptable node transport
pub(crate) struct MockNodes {
    scripts: Mutex<HashMap<u32, NodeScript>>,
    sign_log: Mutex<Vec<RecordedSign>>,
    watch_log: Mutex<Vec<u32>>,
}

impl MockNodes {
    pub(crate) fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            sign_log: Mutex::new(Vec::new()),
            watch_log: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn script(&self, index: u32, script: NodeScript) {
        self.scripts.lock().unwrap().insert(index, script);
    }

    pub(crate) fn sign_log(&self) -> Vec<RecordedSign> {
        self.sign_log.lock().unwrap().clone()
    }

    pub(crate) fn watch_log(&self) -> Vec<u32> {
        self.watch_log.lock().unwrap().clone()
    }
}

fn partial_for(index: u32, assignor: u8) -> Vec<u8> {
    let mut material = b"tip:test:partial:".to_vec();
    material.extend(index.to_be_bytes());
    material.push(assignor);
    let h1 = crypto::sha256(&material);
    let h2 = crypto::sha256(&h1);
    let h3 = crypto::sha256(&h2);
    let mut partial = [h1.as_slice(), h2.as_slice(), h3.as_slice()].concat();
    partial.truncate(66);
    partial
}

#[async_trait]
impl NodeApi for MockNodes {
    async fn sign(
        &self,
        signer: &Signer,
        request: &SignRequest,
        _timeout: Duration,
    ) -> std::result::Result<SignResponse, NodeError> {
        self.sign_log.lock().unwrap().push(RecordedSign {
            index: signer.index,
            id: request.id.clone(),
            nonce: request.nonce,
            has_assignee: request.assignee.is_some(),
            identity: request.identity.clone(),
        });

        let script = {
            let mut scripts = self.scripts.lock().unwrap();
            let script = scripts.entry(signer.index).or_default();
            if script.transient_failures > 0 {
                script.transient_failures -= 1;
                return Err(NodeError::Transport("scripted transient failure".into()));
            }
            script.clone()
        };
        if let Some(code) = script.respond_code {
            return Err(NodeError::Response { code, message: "scripted".into() });
        }

        let mut plain = vec![0u8; RESPONSE_PLAIN_LEN];
        plain[8..74].copy_from_slice(&partial_for(signer.index, script.assignor));
        plain[74..202].fill(script.assignor);
        plain[210..].copy_from_slice(&script.counter.to_be_bytes());

        let user_public = hex::decode(&request.identity).expect("hex identity");
        let key = MockSuite::shared_key(&signer.identity, &user_public);
        let data = SignResponseData { cipher: hex::encode(xor_stream(&key, &plain)) };

        let message = serde_json::to_vec(&data).expect("serializable data");
        let mut signature = MockSuite::node_signature(&signer.identity, &message);
        if script.tamper_signature {
            signature[0] ^= 0x01;
        }
        Ok(SignResponse { data, signature: hex::encode(signature) })
    }

    async fn watch(
        &self,
        signer: &Signer,
        _request: &WatchRequest,
        _timeout: Duration,
    ) -> std::result::Result<WatchResponse, NodeError> {
        self.watch_log.lock().unwrap().push(signer.index);
        let watch_counter = {
            let mut scripts = self.scripts.lock().unwrap();
            let script = scripts.entry(signer.index).or_default();
            if script.transient_failures > 0 {
                script.transient_failures -= 1;
                return Err(NodeError::Transport("scripted transient failure".into()));
            }
            script.watch_counter
        };
        match watch_counter {
            Some(counter) => Ok(WatchResponse { counter }),
            None => Err(NodeError::Transport("scripted unreachable".into())),
        }
    }
}

/// in-memory ephemeral registry
#[derive(Default)]
pub(crate) struct MockRegistry {
    latest: Mutex<Option<String>>,
    published: Mutex<Vec<String>>,
}

impl MockRegistry {
    pub(crate) fn set_latest(&self, encoded: &str) {
        *self.latest.lock().unwrap() = Some(encoded.to_string());
    }

    pub(crate) fn published(&self) -> Vec<String> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl EphemeralRegistry for MockRegistry {
    async fn latest(&self) -> Result<Option<String>> {
        Ok(self.latest.lock().unwrap().clone())
    }

    async fn publish(&self, encoded: &str) -> Result<()> {
        self.published.lock().unwrap().push(encoded.to_string());
        Ok(())
    }
}

/// in-memory account service
///
/// opens submitted pin blobs with the known test pin token so tests can
/// assert their exact layout
pub(crate) struct MockAccount {
    account: Mutex<Option<Account>>,
    seed: Vec<u8>,
    pin_log: Mutex<Vec<PinRequest>>,
    escrow: Mutex<Option<String>>,
}

impl MockAccount {
    pub(crate) fn new(seed: &[u8], account: Option<Account>) -> Self {
        Self {
            account: Mutex::new(account),
            seed: seed.to_vec(),
            pin_log: Mutex::new(Vec::new()),
            escrow: Mutex::new(None),
        }
    }

    /// decrypted pin submissions: (public key, counter, old-pin plaintext)
    pub(crate) fn pin_submissions(&self) -> Vec<(Vec<u8>, u64, Option<Vec<u8>>)> {
        self.pin_log
            .lock()
            .unwrap()
            .iter()
            .map(|request| {
                let sealed = URL_SAFE_NO_PAD.decode(&request.pin).expect("base64 pin blob");
                let opened = crypto::open(PIN_TOKEN, &sealed).expect("sealed pin blob");
                let public = opened[..32].to_vec();
                let counter = u64::from_be_bytes(opened[32..40].try_into().unwrap());
                let old = request.old_pin.as_ref().map(|blob| {
                    let sealed = URL_SAFE_NO_PAD.decode(blob).expect("base64 old pin blob");
                    crypto::open(PIN_TOKEN, &sealed).expect("sealed old pin blob")
                });
                (public, counter, old)
            })
            .collect()
    }
}

#[async_trait]
impl AccountClient for MockAccount {
    async fn current(&self) -> Result<Option<Account>> {
        Ok(self.account.lock().unwrap().clone())
    }

    async fn identity_seed(&self) -> Result<String> {
        Ok(URL_SAFE_NO_PAD.encode(crypto::seal(PIN_TOKEN, &self.seed)?))
    }

    async fn update_pin(&self, request: PinRequest) -> Result<Account> {
        let sealed = URL_SAFE_NO_PAD
            .decode(&request.pin)
            .map_err(|e| Error::Account(e.to_string()))?;
        let opened = crypto::open(PIN_TOKEN, &sealed)?;
        if opened.len() < 40 {
            return Err(Error::Account("malformed pin blob".into()));
        }
        let public = opened[..32].to_vec();
        let counter = u64::from_be_bytes(opened[32..40].try_into().unwrap());

        self.pin_log.lock().unwrap().push(request);

        let mut guard = self.account.lock().unwrap();
        let mut account = guard.clone().ok_or(Error::NoAccount)?;
        account.tip_counter = counter;
        account.tip_key = public;
        *guard = Some(account.clone());
        Ok(account)
    }

    async fn update_secret(&self, request: SecretUpdateRequest) -> Result<()> {
        *self.escrow.lock().unwrap() = Some(request.seed);
        Ok(())
    }

    async fn read_secret(&self, _request: SecretReadRequest) -> Result<String> {
        self.escrow
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::Account("no escrowed secret".into()))
    }
}
