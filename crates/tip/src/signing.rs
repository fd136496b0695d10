//! distributed signing orchestrator
//!
//! fans a signing request out to every node of the registry, retries
//! transient per-node failures, and recovers one aggregate signature
//! once a plurality of partials agrees on the assignor identity.
//!
//! rotation is a two-phase reconciliation: nodes that already moved to
//! the new identity re-validate under the assignee secret, stragglers
//! are re-keyed under the old secret with a self-signed assignee
//! payload. the mode enum keeps both paths exhaustively checked.

use futures::future::join_all;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::api::NodeApi;
use crate::config::{Signer, TipConfig};
use crate::crypto;
use crate::ephemeral::EPHEMERAL_GRACE;
use crate::error::{NodeError, CODE_INCORRECT_PIN, CODE_INTERNAL_SERVER, CODE_TOO_MANY_REQUESTS};
use crate::identity::{IdentitySecret, Watcher};
use crate::node::{sign_node, PartialSig, RetryBudget};
use crate::suite::ThresholdSuite;
use crate::{Error, Result};

/// transient per-node failures are retried at most this many times
pub(crate) const MAX_RETRIES: u64 = 2;

/// fixed spacing between retry attempts against the same node
pub(crate) const RETRY_DELAY: Duration = Duration::from_secs(1);

/// aggregate signatures are always this long
pub const AGG_SIG_LEN: usize = 64;

/// which identity a ceremony presents to the signer network
pub enum SigningMode {
    /// every node is called under the one identity secret
    Plain(IdentitySecret),
    /// pin rotation: nodes still holding the old identity are re-keyed
    /// to `assignee` under the authority of `secret`. an empty
    /// `failed_signers` list means every node is still on the old
    /// identity; a non-empty list limits re-keying to those stragglers
    /// while the rest re-validate under the assignee secret.
    Migrating {
        secret: IdentitySecret,
        assignee: IdentitySecret,
        failed_signers: Vec<Signer>,
    },
}

/// successful ceremony result
pub struct SignOutcome {
    /// recovered aggregate signature, the derived private key material
    pub aggregate: Vec<u8>,
    /// highest epoch counter observed among the contributing nodes
    pub max_counter: u64,
}

/// run one signing ceremony across the registry
///
/// `for_recover` relaxes the all-N success requirement down to the
/// plurality threshold; every other failure rule is identical.
pub async fn sign(
    config: &TipConfig,
    suite: &dyn ThresholdSuite,
    api: &dyn NodeApi,
    mode: &SigningMode,
    ephemeral: &[u8],
    watcher: &Watcher,
    for_recover: bool,
    timeout: Duration,
) -> Result<SignOutcome> {
    let base_nonce = crypto::unix_seconds();

    let results = match mode {
        SigningMode::Plain(secret) => {
            fan_out(
                suite,
                api,
                secret,
                config.signers(),
                ephemeral,
                watcher,
                None,
                base_nonce,
                timeout,
            )
            .await
        }
        SigningMode::Migrating { secret, assignee, failed_signers } => {
            let assignee_public = suite.user_public(assignee)?;
            let self_signature = suite.sign(assignee, &assignee_public)?;
            let mut payload = assignee_public;
            payload.extend(self_signature);

            if failed_signers.is_empty() {
                // nothing has been rotated yet: every node is re-keyed
                fan_out(
                    suite,
                    api,
                    secret,
                    config.signers(),
                    ephemeral,
                    watcher,
                    Some(&payload),
                    base_nonce,
                    timeout,
                )
                .await
            } else {
                let (failed, successful): (Vec<Signer>, Vec<Signer>) = config
                    .signers()
                    .iter()
                    .cloned()
                    .partition(|signer| failed_signers.contains(signer));
                info!(
                    "migration sign: {} previously successful, {} previously failed",
                    successful.len(),
                    failed.len()
                );

                let (successful_results, failed_results) = futures::join!(
                    fan_out(
                        suite,
                        api,
                        assignee,
                        &successful,
                        ephemeral,
                        watcher,
                        None,
                        base_nonce,
                        timeout,
                    ),
                    fan_out(
                        suite,
                        api,
                        secret,
                        &failed,
                        ephemeral,
                        watcher,
                        Some(&payload),
                        base_nonce,
                        timeout,
                    ),
                );

                // the "successful" partition must actually be on the new
                // identity: a counter at or below one means that node
                // never rotated, so the partition map is wrong
                let unrotated = successful_results
                    .iter()
                    .filter_map(|result| result.as_ref().ok())
                    .any(|partial| partial.counter <= 1);
                if successful.is_empty() || unrotated {
                    return Err(Error::DifferentIdentity);
                }

                let mut merged = failed_results;
                merged.extend(successful_results);
                merged
            }
        }
    };

    let mut data: Vec<PartialSig> = Vec::with_capacity(results.len());
    let mut errors: Vec<NodeError> = Vec::new();
    for result in results {
        match result {
            Ok(partial) => data.push(partial),
            Err(err) => errors.push(err),
        }
    }

    // authoritative node errors out-rank any aggregation error: they are
    // statements about the pin or account, not about the network
    for code in [CODE_TOO_MANY_REQUESTS, CODE_INCORRECT_PIN, CODE_INTERNAL_SERVER] {
        if errors.iter().any(|err| err.code() == Some(code)) {
            return Err(match code {
                CODE_TOO_MANY_REQUESTS => Error::TooManyRequests,
                CODE_INCORRECT_PIN => Error::IncorrectPin,
                _ => Error::NodeInternal,
            });
        }
    }

    if !for_recover && data.len() < config.node_count() {
        return Err(Error::NotAllSignersSucceeded {
            successes: data.len(),
            total: config.node_count(),
        });
    }

    let (assignor, partials) = plurality(&data);
    info!("{} of {} partials share the plurality assignor", partials.len(), data.len());
    if partials.len() < config.threshold() {
        return Err(Error::NotEnoughPartials {
            have: partials.len(),
            need: config.threshold(),
        });
    }

    let assignor_bytes = hex::decode(&assignor).map_err(|_| Error::InvalidAssignorData)?;
    let aggregate = suite.recover_signature(
        &partials,
        config.commitments(),
        &assignor_bytes,
        config.node_count(),
    )?;
    if aggregate.len() != AGG_SIG_LEN {
        error!("recovered signature has invalid size {}", aggregate.len());
        return Err(Error::InvalidSignatureSize(aggregate.len()));
    }

    let max_counter = data.iter().map(|partial| partial.counter).max().unwrap_or_default();
    Ok(SignOutcome { aggregate, max_counter })
}

/// group partials by assignor fingerprint and keep the plurality group
fn plurality(data: &[PartialSig]) -> (String, Vec<Vec<u8>>) {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for partial in data {
        *counts.entry(partial.assignor.as_str()).or_default() += 1;
    }
    // ties break on the fingerprint so repeated runs pick the same group
    let assignor = counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(b.0)))
        .map(|(assignor, _)| assignor.to_string())
        .unwrap_or_default();
    let partials = data
        .iter()
        .filter(|partial| partial.assignor == assignor)
        .map(|partial| partial.partial.clone())
        .collect();
    (assignor, partials)
}

/// concurrently call one subset of signers, one bounded retry loop per
/// node; failures come back as values so the whole fan-out always runs
/// to completion
#[allow(clippy::too_many_arguments)]
async fn fan_out(
    suite: &dyn ThresholdSuite,
    api: &dyn NodeApi,
    secret: &IdentitySecret,
    signers: &[Signer],
    ephemeral: &[u8],
    watcher: &Watcher,
    assignee: Option<&[u8]>,
    base_nonce: u64,
    timeout: Duration,
) -> Vec<std::result::Result<PartialSig, NodeError>> {
    let calls: Vec<_> = signers
        .iter()
        .map(|signer| async move {
            let budget = RetryBudget::new(MAX_RETRIES);
            loop {
                let request_id = Uuid::new_v4().to_string();
                // the nonce grows with every retry so no attempt can
                // replay an earlier one
                let nonce = base_nonce + budget.value();
                match sign_node(
                    suite,
                    api,
                    secret,
                    signer,
                    ephemeral,
                    watcher,
                    nonce,
                    EPHEMERAL_GRACE,
                    assignee,
                    &request_id,
                    timeout,
                )
                .await
                {
                    Ok(partial) => {
                        info!("node {} sign succeeded", signer.index);
                        return Ok(partial);
                    }
                    Err(err) if err.is_fatal() => {
                        error!("node {} sign failed ({request_id}): {err}", signer.index);
                        return Err(err);
                    }
                    Err(err) => {
                        warn!("node {} sign failed ({request_id}), retrying: {err}", signer.index);
                    }
                }
                if !budget.count_and_validate() {
                    return Err(NodeError::RetryLimit);
                }
                sleep(RETRY_DELAY).await;
            }
        })
        .collect();
    join_all(calls).await
}
