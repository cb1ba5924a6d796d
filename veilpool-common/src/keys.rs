//! Deterministic secret derivation for deposit lineages.
//!
//! Every deposit lineage is identified by a label. Each link in the lineage
//! (the original deposit, then every withdrawal-change and merge commitment)
//! uses a fresh `(nullifier, secret)` pair derived from the holder's master
//! keys, the label, and a child index. Derivation is a pure function: the
//! same `(keys, label, index)` triple always yields the same secrets, which
//! is what lets a client reconstruct its entire lineage from public chain
//! data alone.

use once_cell::sync::Lazy;
use starknet_crypto::{poseidon_hash_many, FieldElement};

use crate::commitment::precommitment_hash;
use crate::felt::Felt;

/// Domain separator for master nullifier-key derivation.
static NULLIFIER_KEY_DOMAIN: Lazy<Felt> = Lazy::new(|| {
    FieldElement::from_byte_slice_be(b"veilpool.nullifier.v1").expect("domain tag fits in a felt")
});

/// Domain separator for master secret-key derivation.
static SECRET_KEY_DOMAIN: Lazy<Felt> = Lazy::new(|| {
    FieldElement::from_byte_slice_be(b"veilpool.secret.v1").expect("domain tag fits in a felt")
});

/// Master key pair from which all lineage secrets are derived.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MasterKeys {
    nullifier_key: Felt,
    secret_key: Felt,
}

/// One `(nullifier, secret)` pair for a specific `(label, child index)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DerivedSecrets {
    pub nullifier: Felt,
    pub secret: Felt,
    /// Child index the pair was derived at.
    pub index: u64,
}

impl MasterKeys {
    /// Build from existing key material.
    pub fn new(nullifier_key: Felt, secret_key: Felt) -> Self {
        Self {
            nullifier_key,
            secret_key,
        }
    }

    /// Derive a master key pair from a 32-byte seed.
    ///
    /// The seed is split into two 16-byte halves (each trivially below the
    /// field modulus) and hashed under distinct domain tags, so the nullifier
    /// and secret keys are independent even though they share a seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let lo = FieldElement::from_byte_slice_be(&seed[..16]).expect("16 bytes fit in a felt");
        let hi = FieldElement::from_byte_slice_be(&seed[16..]).expect("16 bytes fit in a felt");
        Self {
            nullifier_key: poseidon_hash_many(&[*NULLIFIER_KEY_DOMAIN, lo, hi]),
            secret_key: poseidon_hash_many(&[*SECRET_KEY_DOMAIN, lo, hi]),
        }
    }

    /// Derive the `(nullifier, secret)` pair for `label` at `index`.
    ///
    /// Index 0 corresponds to the original deposit; successive links in the
    /// lineage use higher indices.
    pub fn derive(&self, label: Felt, index: u64) -> DerivedSecrets {
        let idx = Felt::from(index);
        DerivedSecrets {
            nullifier: poseidon_hash_many(&[self.nullifier_key, label, idx]),
            secret: poseidon_hash_many(&[self.secret_key, label, idx]),
            index,
        }
    }
}

impl DerivedSecrets {
    /// Precommitment published on-chain before the full commitment is known.
    pub fn precommitment(&self) -> Felt {
        precommitment_hash(self.nullifier, self.secret)
    }
}
