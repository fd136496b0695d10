//! signer registry and threshold parameters
//!
//! defined once at process start and never mutated afterwards. the
//! commitment count doubles as the recovery threshold: an aggregate
//! signature needs at least that many agreeing partials.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::{Error, Result};

/// one signer node of the threshold network
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Signer {
    /// base58 encoded public identity key
    pub identity: String,
    /// ordinal index within the network, unique
    pub index: u32,
    /// https endpoint for sign/watch calls
    pub api_url: String,
}

// signers are compared by index alone: the registry guarantees one
// identity and endpoint per index
impl PartialEq for Signer {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl Eq for Signer {}

impl std::hash::Hash for Signer {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

/// process-wide threshold configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TipConfig {
    commitments: Vec<String>,
    signers: Vec<Signer>,
}

impl TipConfig {
    /// build a validated config
    ///
    /// the number of commitments is the recovery threshold M and must
    /// satisfy 0 < M < N where N is the signer count
    pub fn new(commitments: Vec<String>, signers: Vec<Signer>) -> Result<Self> {
        if commitments.is_empty() {
            return Err(Error::Config("no commitments".into()));
        }
        if commitments.len() >= signers.len() {
            return Err(Error::Config(format!(
                "threshold {} must be below signer count {}",
                commitments.len(),
                signers.len()
            )));
        }
        let mut indices = HashSet::new();
        for signer in &signers {
            if !indices.insert(signer.index) {
                return Err(Error::Config(format!("duplicate signer index {}", signer.index)));
            }
        }
        Ok(Self { commitments, signers })
    }

    /// load from a json document `{"commitments": [...], "signers": [...]}`
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: TipConfig =
            serde_json::from_str(raw).map_err(|e| Error::Config(e.to_string()))?;
        Self::new(config.commitments, config.signers)
    }

    pub fn commitments(&self) -> &[String] {
        &self.commitments
    }

    pub fn signers(&self) -> &[Signer] {
        &self.signers
    }

    /// minimum number of agreeing partials for a valid aggregate
    pub fn threshold(&self) -> usize {
        self.commitments.len()
    }

    /// total signer count N
    pub fn node_count(&self) -> usize {
        self.signers.len()
    }
}
