//! error types for the tip client

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid pin")]
    InvalidPin,

    #[error("pin token missing from secret store")]
    MissingPinToken,

    #[error("session secret missing from secret store")]
    MissingSessionSecret,

    #[error("no account record available")]
    NoAccount,

    #[error("incorrect pin")]
    IncorrectPin,

    #[error("rate limited by signer network")]
    TooManyRequests,

    #[error("signer reported an internal error")]
    NodeInternal,

    #[error("only {successes} of {total} signers succeeded")]
    NotAllSignersSucceeded { successes: usize, total: usize },

    #[error("not enough partials: have {have}, need {need}")]
    NotEnoughPartials { have: usize, need: usize },

    #[error("signers disagree with the presented identity")]
    DifferentIdentity,

    #[error("assignor fingerprint is not valid hex")]
    InvalidAssignorData,

    #[error("invalid aggregate signature size {0}")]
    InvalidSignatureSize(usize),

    #[error("local counter {local} exceeds node counter {node}")]
    LocalCounterAhead { local: u64, node: u64 },

    #[error("cannot reconcile {0} counter groups")]
    InvalidCounterGroups(usize),

    #[error("config: {0}")]
    Config(String),

    #[error("crypto: {0}")]
    Crypto(String),

    #[error("threshold suite: {0}")]
    Suite(String),

    #[error("secret store: {0}")]
    Store(String),

    #[error("account service: {0}")]
    Account(String),

    #[error("ephemeral registry: {0}")]
    Ephemeral(String),
}

/// per-node failure, collected inside a ceremony fan-out.
///
/// these are values, not propagated errors: the orchestrator gathers one
/// outcome per signer and only afterwards decides what single [`Error`]
/// to surface.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NodeError {
    /// transport failure or timeout, worth retrying
    #[error("transport: {0}")]
    Transport(String),

    /// node answered with an explicit error body
    #[error("node returned status {code}: {message}")]
    Response { code: u16, message: String },

    /// response signature did not verify against the node identity
    #[error("response signature verification failed")]
    BadResponseSignature,

    /// response cipher was not decodable or decryptable
    #[error("response cipher could not be decrypted")]
    BadCipher,

    /// decrypted plaintext had the wrong length
    #[error("malformed plaintext of {0} bytes")]
    MalformedPlaintext(usize),

    /// local crypto failure while building or checking the request
    #[error("crypto: {0}")]
    Crypto(String),

    /// per-node retry budget exhausted
    #[error("retry limit exceeded")]
    RetryLimit,
}

/// node status codes that are authoritative about the pin or account
/// rather than about network conditions
pub(crate) const CODE_INCORRECT_PIN: u16 = 403;
pub(crate) const CODE_TOO_MANY_REQUESTS: u16 = 429;
pub(crate) const CODE_INTERNAL_SERVER: u16 = 500;

impl NodeError {
    /// fatal errors are never retried against the same node within a
    /// ceremony; a hostile or broken response is as final as an
    /// authoritative status code
    pub fn is_fatal(&self) -> bool {
        match self {
            NodeError::Transport(_) => false,
            NodeError::Response { code, .. } => matches!(
                *code,
                CODE_INCORRECT_PIN | CODE_TOO_MANY_REQUESTS | CODE_INTERNAL_SERVER
            ),
            NodeError::BadResponseSignature
            | NodeError::BadCipher
            | NodeError::MalformedPlaintext(_)
            | NodeError::Crypto(_)
            | NodeError::RetryLimit => true,
        }
    }

    /// status code reported by the node, if any
    pub fn code(&self) -> Option<u16> {
        match self {
            NodeError::Response { code, .. } => Some(*code),
            _ => None,
        }
    }
}
