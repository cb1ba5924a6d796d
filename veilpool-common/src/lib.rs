//! veilpool-common
//!
//! Shared primitives for the veilpool shielded payment pool:
//!
//! - [`keys`]: deterministic derivation of `(nullifier, secret)` pairs from
//!   a master key pair, a deposit label, and a child index.
//! - [`commitment`]: commitment, precommitment, and nullifier-hash math over
//!   Poseidon field hashing.
//! - [`merkle`]: lean incremental Merkle tree with dynamic depth and
//!   fixed-width, zero-padded membership proofs.
//! - [`indexer`]: event types and the paginated read client for the pool
//!   indexer.
//!
//! Everything in this crate is insertion-order aware where it matters: the
//! Merkle root is a function of the order labels were inserted, so callers
//! must only ever feed trees from an ordered source.

pub mod commitment;
pub mod felt;
pub mod indexer;
pub mod keys;
pub mod merkle;

pub use commitment::{commitment_hash, is_zero_commitment, nullifier_hash, precommitment_hash, zero_commitment};
pub use felt::{felt_from_hex, felt_to_hex, Felt};
pub use indexer::{
    DepositEvent, HttpIndexer, IndexerApi, IndexerError, MergeDepositEvent, Page, SpendStatus,
    WithdrawalEvent,
};
pub use keys::{DerivedSecrets, MasterKeys};
pub use merkle::{verify_proof, LeanImt, MerkleProof, TreeError, MAX_TREE_DEPTH};
