//! Commitment math for pool deposits.
//!
//! A commitment binds a value, a lineage label, and a precommitment:
//! `commitment = H(value, label, precommitment)` where
//! `precommitment = H(nullifier, secret)`. Spending a commitment publishes
//! `H(nullifier)`, which is what the indexer's spend lookups are keyed by.

use starknet_crypto::{poseidon_hash, poseidon_hash_many, poseidon_hash_single};

use crate::felt::Felt;

/// `H(nullifier, secret)`, published at deposit/merge time.
pub fn precommitment_hash(nullifier: Felt, secret: Felt) -> Felt {
    poseidon_hash(nullifier, secret)
}

/// `H(value, label, precommitment)`, a state-tree leaf.
pub fn commitment_hash(value: u128, label: Felt, precommitment: Felt) -> Felt {
    poseidon_hash_many(&[Felt::from(value), label, precommitment])
}

/// `H(nullifier)`, published on spend.
pub fn nullifier_hash(nullifier: Felt) -> Felt {
    poseidon_hash_single(nullifier)
}

/// The zero commitment. A withdrawal that records it as its change
/// commitment terminates the lineage.
pub fn zero_commitment() -> Felt {
    Felt::ZERO
}

pub fn is_zero_commitment(commitment: Felt) -> bool {
    commitment == Felt::ZERO
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::MasterKeys;

    #[test]
    fn test_commitment_binds_all_inputs() {
        let keys = MasterKeys::from_seed(&[1u8; 32]);
        let label = Felt::from(77u64);
        let secrets = keys.derive(label, 0);
        let pre = secrets.precommitment();

        let base = commitment_hash(100, label, pre);
        assert_ne!(base, commitment_hash(101, label, pre));
        assert_ne!(base, commitment_hash(100, Felt::from(78u64), pre));
        assert_ne!(base, commitment_hash(100, label, Felt::ONE));
    }

    #[test]
    fn test_nullifier_hash_differs_from_nullifier() {
        let nullifier = Felt::from(12345u64);
        assert_ne!(nullifier_hash(nullifier), nullifier);
    }

    #[test]
    fn test_zero_commitment() {
        assert!(is_zero_commitment(zero_commitment()));
        assert!(!is_zero_commitment(Felt::ONE));
    }
}
