//! tip orchestrator
//!
//! sequences identity derivation, the distributed signing ceremony,
//! local persistence and the account-service update into the two
//! user-facing operations: establish a key for the first time and rotate
//! it to a new pin. everything stateful is an injected capability so the
//! core carries no global state beyond the signer registry.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use ed25519_dalek::{Signer as _, SigningKey};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::account::{verify_body, Account, AccountClient, PinRequest, SecretReadRequest, SecretUpdateRequest};
use crate::api::NodeApi;
use crate::config::{Signer, TipConfig};
use crate::counter::{self, CounterOutcome};
use crate::crypto;
use crate::ephemeral::{self, EphemeralRegistry};
use crate::identity::{self, IdentitySecret, Watcher};
use crate::signing::{self, SigningMode};
use crate::store::{keys, SecretStore};
use crate::suite::ThresholdSuite;
use crate::{Error, Result};

const DEFAULT_SIGN_TIMEOUT: Duration = Duration::from_secs(30);
const EVENT_CAPACITY: usize = 16;

/// published after every successful establish or rotate
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TipEvent {
    Updated { counter: u64 },
}

/// where an account stands with respect to tip
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TipStatus {
    /// a tip key is established
    Ready,
    /// no tip key and no legacy pin: first establish pending
    NeedsInitialize,
    /// no tip key but a legacy pin exists: migration pending
    NeedsMigrate,
}

/// the tip signing core
pub struct Tip {
    config: TipConfig,
    suite: Arc<dyn ThresholdSuite>,
    api: Arc<dyn NodeApi>,
    store: Arc<dyn SecretStore>,
    registry: Arc<dyn EphemeralRegistry>,
    account: Arc<dyn AccountClient>,
    events: broadcast::Sender<TipEvent>,
    sign_timeout: Duration,
}

impl Tip {
    pub fn new(
        config: TipConfig,
        suite: Arc<dyn ThresholdSuite>,
        api: Arc<dyn NodeApi>,
        store: Arc<dyn SecretStore>,
        registry: Arc<dyn EphemeralRegistry>,
        account: Arc<dyn AccountClient>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            suite,
            api,
            store,
            registry,
            account,
            events,
            sign_timeout: DEFAULT_SIGN_TIMEOUT,
        }
    }

    pub fn with_sign_timeout(mut self, timeout: Duration) -> Self {
        self.sign_timeout = timeout;
        self
    }

    /// subscribe to update events
    pub fn subscribe(&self) -> broadcast::Receiver<TipEvent> {
        self.events.subscribe()
    }

    /// classify an account's tip state
    pub fn status(account: &Account) -> TipStatus {
        if account.tip_counter == 0 {
            if account.has_pin {
                TipStatus::NeedsMigrate
            } else {
                TipStatus::NeedsInitialize
            }
        } else {
            TipStatus::Ready
        }
    }

    /// establish the tip key for the first time
    ///
    /// `legacy_pin` carries the pre-tip pin for accounts migrating off
    /// it. with `for_recover` the ceremony tolerates node failures down
    /// to the threshold and only re-creates the local sealed aggregate,
    /// without touching the account service.
    pub async fn create_priv(
        &self,
        pin: &str,
        legacy_pin: Option<&str>,
        for_recover: bool,
    ) -> Result<Vec<u8>> {
        let pin = pin_bytes(pin)?;
        let pin_token = self.pin_token().await?;
        info!("establishing tip key, recover: {for_recover}");

        let ephemeral =
            ephemeral::resolve(self.store.as_ref(), self.registry.as_ref(), &pin_token).await?;
        let (secret, watcher) = self.identity_pair(&pin, &pin_token).await?;

        let outcome = signing::sign(
            &self.config,
            self.suite.as_ref(),
            self.api.as_ref(),
            &SigningMode::Plain(secret),
            &ephemeral,
            &watcher,
            for_recover,
            self.sign_timeout,
        )
        .await?;
        let aggregate = outcome.aggregate;

        let public = derived_key(&aggregate).verifying_key().to_bytes();
        if let Some(account) = self.account.current().await? {
            if !account.tip_key.is_empty() && account.tip_key != public {
                // the ceremony succeeded under some identity, just not
                // the one this account published: the pin was wrong
                return Err(Error::IncorrectPin);
            }
        }

        let aes_key = self.generate_aes_key(&pin, &pin_token).await?;
        if for_recover {
            self.save_priv(&pin, &aggregate, &aes_key).await?;
            return Ok(aggregate);
        }

        let old_pin = match legacy_pin {
            Some(legacy) => {
                let legacy = pin_bytes(legacy)?;
                Some(self.encrypt_pin(&pin_token, &legacy).await?)
            }
            None => None,
        };
        let mut code = public.to_vec();
        code.extend(1u64.to_be_bytes());
        let request = PinRequest { pin: self.encrypt_pin(&pin_token, &code).await?, old_pin };

        let account = self.account.update_pin(request).await?;
        info!("account updated with tip counter {}", account.tip_counter);

        self.save_priv(&pin, &aggregate, &aes_key).await?;
        let _ = self.events.send(TipEvent::Updated { counter: account.tip_counter });
        Ok(aggregate)
    }

    /// rotate the tip key to a new pin
    ///
    /// `failed_signers` is the straggler list from a previous partially
    /// failed rotation (see [`CounterOutcome::Divergent`]); with it the
    /// ceremony runs the partition-and-merge migration path.
    pub async fn update_priv(
        &self,
        old_pin: Option<&str>,
        new_pin: &str,
        failed_signers: Vec<Signer>,
    ) -> Result<Vec<u8>> {
        let new_pin = pin_bytes(new_pin)?;
        let pin_token = self.pin_token().await?;
        info!(
            "rotating tip key, old pin: {}, failed signers: {:?}",
            old_pin.is_some(),
            failed_signers.iter().map(|signer| signer.index).collect::<Vec<_>>()
        );

        let ephemeral =
            ephemeral::resolve(self.store.as_ref(), self.registry.as_ref(), &pin_token).await?;
        let (mode, watcher) = match old_pin {
            Some(old) => {
                let old = pin_bytes(old)?;
                let (secret, watcher) = self.identity_pair(&old, &pin_token).await?;
                let (assignee, _) = self.identity_pair(&new_pin, &pin_token).await?;
                (SigningMode::Migrating { secret, assignee, failed_signers }, watcher)
            }
            None => {
                let (secret, watcher) = self.identity_pair(&new_pin, &pin_token).await?;
                (SigningMode::Plain(secret), watcher)
            }
        };

        let outcome = signing::sign(
            &self.config,
            self.suite.as_ref(),
            self.api.as_ref(),
            &mode,
            &ephemeral,
            &watcher,
            false,
            self.sign_timeout,
        )
        .await?;
        let aggregate = outcome.aggregate;

        let aes_key = self.generate_aes_key(&new_pin, &pin_token).await?;
        let public = derived_key(&aggregate).verifying_key().to_bytes();

        let account = self.account.current().await?.ok_or(Error::NoAccount)?;
        let counter = account.tip_counter;

        // proof of possession: the submitted value is authenticated by a
        // signature under the key the signer network just agreed on
        let target = verify_body(counter);
        let old_pin = self.encrypt_tip_pin(&pin_token, &aggregate, &target).await?;
        let mut code = public.to_vec();
        code.extend((counter + 1).to_be_bytes());
        let request = PinRequest {
            pin: self.encrypt_pin(&pin_token, &code).await?,
            old_pin: Some(old_pin),
        };

        // drop the stale sealed aggregate first: a crash between the
        // account call and persistence must not leave a key sealed under
        // the old pin
        self.store.delete(keys::TIP_PRIV).await?;
        info!("stored tip key removed ahead of rotation");

        let account = self.account.update_pin(request).await?;
        info!("account updated with tip counter {}", account.tip_counter);

        self.save_priv(&new_pin, &aggregate, &aes_key).await?;
        let _ = self.events.send(TipEvent::Updated { counter: account.tip_counter });
        Ok(aggregate)
    }

    /// query every node's epoch counter and classify the result
    pub async fn check_counter(
        &self,
        account: &Account,
        timeout: Duration,
    ) -> Result<CounterOutcome> {
        let pin_token = self.pin_token().await?;
        let seed = self.identity_seed(&pin_token).await?;
        let watcher = Watcher::from_seed(&seed);

        let counters =
            counter::watch_all(&self.config, self.api.as_ref(), &watcher, timeout).await;
        if counters.len() != self.config.node_count() {
            warn!("watched {} of {} nodes", counters.len(), self.config.node_count());
        }
        counter::check(account, &counters)
    }

    /// produce an encrypted signature blob over `target`, using the
    /// stored aggregate or recovering it from the signer network first
    pub async fn encrypt_pin_for(&self, pin: &str, target: &[u8]) -> Result<String> {
        let pin_raw = pin_bytes(pin)?;
        let pin_token = self.pin_token().await?;

        let aggregate = match self.load_priv(&pin_raw, &pin_token).await? {
            Some(aggregate) => {
                info!("encrypting with stored aggregate");
                aggregate
            }
            None => {
                info!("encrypting with recovered aggregate");
                self.create_priv(pin, None, true).await?
            }
        };
        self.encrypt_tip_pin(&pin_token, &aggregate, target).await
    }

    async fn pin_token(&self) -> Result<Vec<u8>> {
        self.store
            .get(keys::PIN_TOKEN)
            .await?
            .ok_or(Error::MissingPinToken)
    }

    /// identity seed: cached locally, otherwise fetched from escrow and
    /// opened with the pin token
    async fn identity_seed(&self, pin_token: &[u8]) -> Result<Vec<u8>> {
        if let Some(seed) = self.store.get(keys::IDENTITY_SEED).await? {
            return Ok(seed);
        }
        let encoded = self.account.identity_seed().await?;
        let sealed = URL_SAFE_NO_PAD
            .decode(&encoded)
            .map_err(|e| Error::Account(format!("undecodable identity seed: {e}")))?;
        let seed = crypto::open(pin_token, &sealed)?;
        self.store.put(keys::IDENTITY_SEED, &seed).await?;
        Ok(seed)
    }

    async fn identity_pair(
        &self,
        pin: &[u8],
        pin_token: &[u8],
    ) -> Result<(IdentitySecret, Watcher)> {
        let seed = self.identity_seed(pin_token).await?;
        identity::derive(pin, &seed)
    }

    /// encrypted pin blob: code, unix seconds and a monotonic iterator,
    /// sealed under the pin token
    async fn encrypt_pin(&self, pin_token: &[u8], code: &[u8]) -> Result<String> {
        let iterator = self.store.next_iterator().await?;
        let mut blob = code.to_vec();
        blob.extend(crypto::unix_seconds().to_le_bytes());
        blob.extend(iterator.to_le_bytes());
        Ok(URL_SAFE_NO_PAD.encode(crypto::seal(pin_token, &blob)?))
    }

    /// encrypted pin blob carrying a signature over `target` under the
    /// key derived from an aggregate
    async fn encrypt_tip_pin(
        &self,
        pin_token: &[u8],
        aggregate: &[u8],
        target: &[u8],
    ) -> Result<String> {
        let signature = derived_key(aggregate).sign(target).to_bytes();
        self.encrypt_pin(pin_token, &signature).await
    }

    /// session-bound key pair used to authenticate storage-key escrow
    async fn session_key(&self, pin: &[u8]) -> Result<SigningKey> {
        let session_priv = self
            .store
            .get(keys::SESSION_SECRET)
            .await?
            .ok_or(Error::MissingSessionSecret)?;
        let mut ikm = session_priv;
        ikm.extend_from_slice(pin);
        Ok(SigningKey::from_bytes(&crypto::sha3_256(&ikm)))
    }

    /// mint a fresh storage key and escrow it with the account service
    async fn generate_aes_key(&self, pin: &[u8], pin_token: &[u8]) -> Result<Vec<u8>> {
        let session = self.session_key(pin).await?;
        let key = crypto::random_bytes::<32>();

        let timestamp = crypto::unix_nanos();
        let signature = URL_SAFE_NO_PAD.encode(session.sign(&verify_body(timestamp)).to_bytes());
        let request = SecretUpdateRequest {
            seed: URL_SAFE_NO_PAD.encode(crypto::seal(pin_token, &key)?),
            secret: URL_SAFE_NO_PAD
                .encode(crypto::seal(pin_token, &session.verifying_key().to_bytes())?),
            signature,
            timestamp,
        };
        self.account.update_secret(request).await?;
        Ok(key.to_vec())
    }

    /// read the escrowed storage key back
    async fn get_aes_key(&self, pin: &[u8], pin_token: &[u8]) -> Result<Vec<u8>> {
        let session = self.session_key(pin).await?;
        let timestamp = crypto::unix_nanos();
        let signature = URL_SAFE_NO_PAD.encode(session.sign(&verify_body(timestamp)).to_bytes());

        let encoded = self.account.read_secret(SecretReadRequest { signature, timestamp }).await?;
        let sealed = URL_SAFE_NO_PAD
            .decode(&encoded)
            .map_err(|e| Error::Account(format!("undecodable storage key: {e}")))?;
        crypto::open(pin_token, &sealed)
    }

    async fn save_priv(&self, pin: &[u8], aggregate: &[u8], aes_key: &[u8]) -> Result<()> {
        let key = crypto::storage_key(aes_key, pin)?;
        let sealed = crypto::seal(&key, aggregate)?;
        self.store.put(keys::TIP_PRIV, &sealed).await?;
        info!("tip key sealed and stored");
        Ok(())
    }

    async fn load_priv(&self, pin: &[u8], pin_token: &[u8]) -> Result<Option<Vec<u8>>> {
        let Some(sealed) = self.store.get(keys::TIP_PRIV).await? else {
            return Ok(None);
        };
        let aes_key = self.get_aes_key(pin, pin_token).await?;
        let key = crypto::storage_key(&aes_key, pin)?;
        Ok(Some(crypto::open(&key, &sealed)?))
    }
}

/// ed25519 key derived from an aggregate signature
fn derived_key(aggregate: &[u8]) -> SigningKey {
    SigningKey::from_bytes(&crypto::sha3_256(aggregate))
}

fn pin_bytes(pin: &str) -> Result<Zeroizing<Vec<u8>>> {
    if pin.is_empty() {
        return Err(Error::InvalidPin);
    }
    Ok(Zeroizing::new(pin.as_bytes().to_vec()))
}
