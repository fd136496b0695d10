//! epoch counter consistency checker
//!
//! every node advances a per-user counter on each successful rotation.
//! querying all of them (read-only, watcher only) and grouping the
//! values tells the client whether the network is balanced, ahead of it,
//! or split across two identities mid-rotation.

use futures::future::join_all;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::account::Account;
use crate::api::{NodeApi, WatchRequest};
use crate::config::{Signer, TipConfig};
use crate::identity::Watcher;
use crate::node::RetryBudget;
use crate::signing::{MAX_RETRIES, RETRY_DELAY};
use crate::{Error, Result};

/// one node's reported epoch counter
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeCounter {
    pub value: u64,
    pub signer: Signer,
}

/// which top-level operation an interrupted run belonged to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TipAction {
    /// first pin on a fresh account
    Create,
    /// pin change on an established account
    Change,
    /// first tip pin on an account carrying a legacy pin
    Migrate,
}

/// what is left to reconcile
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Situation {
    /// nodes agree and are ahead: only the account record needs catching
    /// up (for example after a crash between remote and local commit)
    PendingUpdate,
    /// nodes split across two counters: the stragglers listed here must
    /// be re-signed via the migration path
    PendingSign(Vec<Signer>),
}

/// context handed back to the caller to resume an interrupted rotation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterruptionContext {
    pub action: TipAction,
    pub situation: Situation,
    pub max_node_counter: u64,
}

impl InterruptionContext {
    pub(crate) fn new(account: &Account, situation: Situation, max_node_counter: u64) -> Self {
        // a node counter of one means the interrupted run was the very
        // first establish; whether that was a create or a legacy
        // migration depends on the account
        let action = if max_node_counter == 1 {
            if account.has_pin {
                TipAction::Migrate
            } else {
                TipAction::Create
            }
        } else {
            TipAction::Change
        };
        Self { action, situation, max_node_counter }
    }
}

/// counter check result
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CounterOutcome {
    /// nodes agree with the local counter, nothing to reconcile
    Balanced,
    /// nodes agree with each other but are ahead of the local counter
    NodeAhead(InterruptionContext),
    /// nodes are split across two counters
    Divergent(InterruptionContext),
}

/// query every signer's current counter concurrently
///
/// per-node failures and invalid (negative) counters consume the node's
/// retry budget; nodes that never answer are dropped with a warning so
/// the caller classifies whatever subset responded.
pub async fn watch_all(
    config: &TipConfig,
    api: &dyn NodeApi,
    watcher: &Watcher,
    timeout: Duration,
) -> Vec<NodeCounter> {
    let request = WatchRequest { watcher: watcher.to_hex() };
    let calls: Vec<_> = config
        .signers()
        .iter()
        .map(|signer| {
            let request = request.clone();
            async move {
                let budget = RetryBudget::new(MAX_RETRIES);
                loop {
                    info!("watching node {}", signer.index);
                    match api.watch(signer, &request, timeout).await {
                        Ok(response) if response.counter >= 0 => {
                            return Some(NodeCounter {
                                value: response.counter as u64,
                                signer: signer.clone(),
                            });
                        }
                        Ok(response) => {
                            warn!("invalid counter {} from node {}", response.counter, signer.index);
                        }
                        Err(err) => {
                            warn!("node {} watch failed: {err}", signer.index);
                        }
                    }
                    if !budget.count_and_validate() {
                        warn!("node {} watch retry limited", signer.index);
                        return None;
                    }
                    sleep(RETRY_DELAY).await;
                }
            }
        })
        .collect();

    join_all(calls).await.into_iter().flatten().collect()
}

/// classify watched counters against the locally committed one
pub fn check(account: &Account, counters: &[NodeCounter]) -> Result<CounterOutcome> {
    if counters.is_empty() {
        return Ok(CounterOutcome::Balanced);
    }

    let mut groups: BTreeMap<u64, Vec<Signer>> = BTreeMap::new();
    for counter in counters {
        groups.entry(counter.value).or_default().push(counter.signer.clone());
    }

    match groups.len() {
        1 => {
            let node_counter = *groups.keys().next().expect("one group");
            if node_counter == account.tip_counter {
                Ok(CounterOutcome::Balanced)
            } else if node_counter < account.tip_counter {
                // the client can never legitimately be ahead of every
                // node; local state is corrupt
                Err(Error::LocalCounterAhead {
                    local: account.tip_counter,
                    node: node_counter,
                })
            } else {
                Ok(CounterOutcome::NodeAhead(InterruptionContext::new(
                    account,
                    Situation::PendingUpdate,
                    node_counter,
                )))
            }
        }
        2 => {
            let max_counter = *groups.keys().next_back().expect("two groups");
            let min_counter = *groups.keys().next().expect("two groups");
            let failed = groups.remove(&min_counter).expect("minority group");
            Ok(CounterOutcome::Divergent(InterruptionContext::new(
                account,
                Situation::PendingSign(failed),
                max_counter,
            )))
        }
        n => Err(Error::InvalidCounterGroups(n)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_config, test_watcher, MockNodes, NodeScript};

    fn account(tip_counter: u64, has_pin: bool) -> Account {
        Account {
            user_id: "user".into(),
            tip_counter,
            tip_key: Vec::new(),
            has_pin,
        }
    }

    fn counters(values: &[u64]) -> Vec<NodeCounter> {
        let config = test_config();
        values
            .iter()
            .zip(config.signers())
            .map(|(&value, signer)| NodeCounter { value, signer: signer.clone() })
            .collect()
    }

    #[test]
    fn uniform_counters_matching_local_are_balanced() {
        let outcome = check(&account(5, false), &counters(&[5, 5, 5, 5, 5, 5, 5])).unwrap();
        assert_eq!(outcome, CounterOutcome::Balanced);
    }

    #[test]
    fn no_responses_are_balanced() {
        let outcome = check(&account(5, false), &[]).unwrap();
        assert_eq!(outcome, CounterOutcome::Balanced);
    }

    #[test]
    fn split_counters_name_the_minority_as_failed() {
        let outcome = check(&account(5, false), &counters(&[5, 5, 5, 5, 3, 3, 3])).unwrap();
        match outcome {
            CounterOutcome::Divergent(context) => {
                assert_eq!(context.max_node_counter, 5);
                assert_eq!(context.action, TipAction::Change);
                let Situation::PendingSign(failed) = context.situation else {
                    panic!("expected pending sign");
                };
                let indices: Vec<u32> = failed.iter().map(|signer| signer.index).collect();
                assert_eq!(indices, vec![5, 6, 7]);
            }
            other => panic!("expected divergent, got {other:?}"),
        }
    }

    #[test]
    fn local_counter_ahead_of_every_node_is_fatal() {
        let result = check(&account(6, false), &counters(&[5, 5, 5, 5, 5, 5, 5]));
        assert!(matches!(result, Err(Error::LocalCounterAhead { local: 6, node: 5 })));
    }

    #[test]
    fn more_than_two_groups_are_fatal() {
        let result = check(&account(4, false), &counters(&[1, 2, 3, 4, 5, 6, 7]));
        assert!(matches!(result, Err(Error::InvalidCounterGroups(7))));
    }

    #[test]
    fn node_ahead_yields_pending_update() {
        let outcome = check(&account(5, false), &counters(&[6, 6, 6, 6, 6, 6, 6])).unwrap();
        match outcome {
            CounterOutcome::NodeAhead(context) => {
                assert_eq!(context.max_node_counter, 6);
                assert_eq!(context.situation, Situation::PendingUpdate);
                assert_eq!(context.action, TipAction::Change);
            }
            other => panic!("expected node ahead, got {other:?}"),
        }
    }

    #[test]
    fn interrupted_first_run_classifies_by_legacy_pin() {
        let outcome = check(&account(0, false), &counters(&[1, 1, 1, 1, 1, 1, 1])).unwrap();
        let CounterOutcome::NodeAhead(context) = outcome else { panic!() };
        assert_eq!(context.action, TipAction::Create);

        let outcome = check(&account(0, true), &counters(&[1, 1, 1, 1, 1, 1, 1])).unwrap();
        let CounterOutcome::NodeAhead(context) = outcome else { panic!() };
        assert_eq!(context.action, TipAction::Migrate);
    }

    #[tokio::test(start_paused = true)]
    async fn watch_drops_unreachable_nodes() {
        let nodes = MockNodes::new();
        for index in 1..=6 {
            nodes.script(index, NodeScript::watching(4));
        }
        nodes.script(7, NodeScript::unreachable());

        let config = test_config();
        let counters =
            watch_all(&config, &nodes, &test_watcher(), Duration::from_secs(5)).await;
        assert_eq!(counters.len(), 6);
        assert!(counters.iter().all(|counter| counter.value == 4));
        // the unreachable node consumed its whole budget
        let attempts = nodes.watch_log().into_iter().filter(|&index| index == 7).count();
        assert_eq!(attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn watch_retries_invalid_counters() {
        let nodes = MockNodes::new();
        for index in 1..=7 {
            nodes.script(index, NodeScript::watching(2));
        }
        nodes.script(5, NodeScript::watching(-1));

        let config = test_config();
        let counters =
            watch_all(&config, &nodes, &test_watcher(), Duration::from_secs(5)).await;
        // node 5 only ever reports an invalid value and is dropped
        assert_eq!(counters.len(), 6);
    }
}
