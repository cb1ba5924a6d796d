//! Error types for the association set provider.

use thiserror::Error;
use veilpool_common::{IndexerError, TreeError};

/// Aggregated error type for the ASP tree manager and its worker.
#[derive(Debug, Error)]
pub enum AspError {
    /// Missing or malformed configuration. Never retried.
    #[error("configuration error: {0}")]
    Config(String),

    /// Signer cannot pay for the root-update transaction. Never retried.
    #[error("insufficient signer balance: account {address} holds {balance}, needs at least {required}")]
    Funding {
        address: String,
        balance: u128,
        required: u128,
    },

    /// Transient chain/RPC failure.
    #[error("transient chain error: {0}")]
    Transient(String),

    /// Indexer read failure.
    #[error("indexer error: {0}")]
    Indexer(#[from] IndexerError),

    /// Tree operation failure.
    #[error("tree error: {0}")]
    Tree(#[from] TreeError),

    /// Durable mirror failure.
    #[error("durable mirror error: {0}")]
    Mirror(String),

    /// Proof requested for a label that is not in the tree.
    #[error("label {0} is not in the association set")]
    UnknownLabel(String),

    /// Root-update transaction confirmed but reverted.
    #[error("root update transaction {0} reverted on-chain")]
    Reverted(String),

    /// Local tree cannot reproduce the on-chain root even after a full
    /// ordered rebuild.
    #[error("association set out of sync with on-chain root; retry later")]
    OutOfSync,

    /// Retry wrapper exhausted its attempt budget.
    #[error("root update failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

impl AspError {
    /// Whether retrying can plausibly succeed. Configuration and funding
    /// problems never self-heal and must surface immediately; a revert may
    /// be a lost race with another updater and resolves via the
    /// roots-already-equal no-op on the next attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AspError::Transient(_) | AspError::Indexer(_) | AspError::Reverted(_)
        )
    }

    /// Whether the error should terminate the worker outright.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AspError::Config(_) | AspError::Funding { .. })
    }
}
