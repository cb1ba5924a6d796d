//! Error types for the deposit chain resolver.

use thiserror::Error;
use veilpool_common::IndexerError;

/// Errors raised while resolving deposit lineages.
#[derive(Debug, Error)]
pub enum ResolverError {
    /// Indexer lookup failure.
    #[error("indexer error: {0}")]
    Indexer(#[from] IndexerError),

    /// The identity changed while a trace was in flight; its results must
    /// be discarded.
    #[error("resolution cancelled by identity switch")]
    Cancelled,

    /// Chain/indexer data contradicts what the derived secrets reconstruct.
    #[error("inconsistent lineage data: {0}")]
    Inconsistent(String),
}
