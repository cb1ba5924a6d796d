//! veilpool-resolver
//!
//! Client-side resolution of deposit lineages for the veilpool shielded
//! pool. Starting from the raw deposits an identity's keys can recover, the
//! resolver follows each lineage through its withdrawals and merges, using
//! only deterministic secret derivation and public indexer data, and
//! reports the single currently-unspent commitment per lineage. The result
//! is the wallet's spendable balance.

pub mod error;
pub mod resolver;

pub use error::ResolverError;
pub use resolver::{
    ActiveDeposit, DepositChainResolver, RecoveredDeposit, MAX_TRACE_DEPTH,
    MERGE_INDEX_SCAN_LIMIT,
};
