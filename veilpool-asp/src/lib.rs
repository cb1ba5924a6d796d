//! veilpool-asp
//!
//! Association set provider for the veilpool shielded pool.
//!
//! The manager maintains an append-only Merkle tree of approved labels and
//! keeps an on-chain root in step with it:
//!
//! 1. New deposits stream in from the indexer; their labels are appended to
//!    the tree in arrival order and mirrored durably.
//! 2. The local root is pushed to the entrypoint contract when it diverges,
//!    with balance checks, receipt confirmation, and bounded retries.
//! 3. Membership proofs over the tree authorize withdrawals that reference
//!    only vetted labels.
//!
//! Because the tree root depends on insertion order, the durable mirror (an
//! unordered label set) is only ever a membership cache; rebuilds replay the
//! indexer's ordered feed.

pub mod chain;
pub mod config;
pub mod error;
pub mod manager;
pub mod mirror;

pub use chain::{AspContract, RootUpdate, StarknetAspContract};
pub use config::AspConfig;
pub use error::AspError;
pub use manager::{AspStatus, AspTreeManager, InitReport, InitSource};
pub use mirror::{MembershipCache, OrderedRebuildSource, SqliteMirror};
