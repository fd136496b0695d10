//! # tip
//!
//! threshold identity protocol client: derives a user's signing key from
//! a short pin by running a distributed threshold-signature ceremony
//! across a fixed set of independent signer nodes.
//!
//! ## architecture
//!
//! ```text
//! ┌──────────────────┐
//! │    pin + seed    │
//! └────────┬─────────┘
//!          │ argon2id
//!          ▼
//!   ┌──────────────┐
//!   │   identity   │
//!   └──────┬───────┘
//!          │ concurrent sign, per-node retries
//!    ┌──┬──┼──┬──┬──┬──┐
//!    ▼  ▼  ▼  ▼  ▼  ▼  ▼
//!  ┌──┐┌──┐┌──┐┌──┐┌──┐┌──┐┌──┐
//!  │n1││n2││n3││n4││n5││n6││n7│   (7 nodes, 5-of-7 threshold)
//!  └┬─┘└┬─┘└┬─┘└┬─┘└┬─┘└┬─┘└┬─┘
//!   └───┴───┴─┬─┴───┴───┴───┘
//!             ▼ partials, plurality assignor
//!    ┌─────────────────┐
//!    │    aggregate    │  (threshold recovery)
//!    └────────┬────────┘
//!             │ sha3-256
//!             ▼
//!    ┌─────────────────┐
//!    │     ed25519     │  (account signing key)
//!    └─────────────────┘
//! ```
//!
//! no node ever sees the pin or the full key. a node gates its partial
//! on proof of pin knowledge and advances a per-user epoch counter on
//! every rotation; comparing counters across the network detects nodes
//! left behind by an interrupted rotation so they can be migrated
//! forward without restarting the ceremony.
//!
//! ## capabilities
//!
//! the pairing curve arithmetic ([`ThresholdSuite`]), node transport
//! ([`NodeApi`]), secure storage ([`SecretStore`]), ephemeral escrow
//! ([`EphemeralRegistry`]) and account service ([`AccountClient`]) are
//! injected, so the core stays testable and free of platform bindings.
//!
//! ## usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tip::{HttpNodeApi, MemoryStore, Tip, TipConfig};
//!
//! let config = TipConfig::from_json(include_str!("../config/mainnet.json"))?;
//! let tip = Tip::new(config, suite, Arc::new(HttpNodeApi::new()),
//!                    Arc::new(MemoryStore::new()), registry, account);
//!
//! // first pin
//! tip.create_priv("220011", None, false).await?;
//!
//! // rotate, resuming a partially failed attempt if nodes diverged
//! match tip.check_counter(&account_record, timeout).await? {
//!     tip::CounterOutcome::Divergent(context) => {
//!         let tip::Situation::PendingSign(failed) = context.situation else { return Ok(()) };
//!         tip.update_priv(Some("220011"), "995511", failed).await?;
//!     }
//!     _ => {
//!         tip.update_priv(Some("220011"), "995511", Vec::new()).await?;
//!     }
//! }
//! ```

pub mod account;
pub mod api;
pub mod config;
pub mod counter;
pub mod crypto;
pub mod ephemeral;
pub mod error;
pub mod identity;
pub mod node;
pub mod protocol;
pub mod signing;
pub mod store;
pub mod suite;

#[cfg(test)]
pub(crate) mod testing;

pub use account::{Account, AccountClient, PinRequest, SecretReadRequest, SecretUpdateRequest};
pub use api::{
    HttpNodeApi, NodeApi, SignRequest, SignResponse, SignResponseData, WatchRequest,
    WatchResponse,
};
pub use config::{Signer, TipConfig};
pub use counter::{
    CounterOutcome, InterruptionContext, NodeCounter, Situation, TipAction,
};
pub use error::{Error, NodeError, Result};
pub use ephemeral::EphemeralRegistry;
pub use identity::{IdentitySecret, Watcher};
pub use node::PartialSig;
pub use protocol::{Tip, TipEvent, TipStatus};
pub use signing::{SignOutcome, SigningMode, AGG_SIG_LEN};
pub use store::{MemoryStore, SecretStore};
pub use suite::ThresholdSuite;
