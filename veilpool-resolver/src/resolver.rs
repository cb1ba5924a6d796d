//! Deposit chain resolver.
//!
//! Given the raw deposits an identity's keys can recover, determine which
//! commitment in each lineage is still spendable. A lineage advances every
//! time its current commitment is spent:
//!
//! - a **withdrawal** leaves a change commitment for the remaining value
//!   (or the zero commitment when the lineage was drained), derived at the
//!   next child index;
//! - a **merge** consolidates a fresh deposit into the commitment, producing
//!   a larger one at whatever child index the merge actually used on-chain.
//!
//! Each lineage is traced with an explicit work-list loop (no recursion) and
//! a hard iteration cap, re-deriving and verifying every step against the
//! recorded event data. Traces check a monotonically increasing identity
//! epoch once per iteration, so an account switch abandons in-flight work
//! instead of committing another identity's results.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};
use veilpool_common::{
    commitment_hash, felt_to_hex, is_zero_commitment, nullifier_hash, precommitment_hash, Felt,
    IndexerApi, MasterKeys, MergeDepositEvent, SpendStatus, WithdrawalEvent,
};

use crate::error::ResolverError;

/// Hard cap on lineage length; also bounds adversarially long chains.
pub const MAX_TRACE_DEPTH: usize = 50;

/// How many candidate child indices to try when recovering the index a
/// merge actually used.
pub const MERGE_INDEX_SCAN_LIMIT: u64 = 100;

/// A raw deposit recovered from the identity's keys; the trace starting
/// point for one lineage.
#[derive(Clone, Debug)]
pub struct RecoveredDeposit {
    /// Position of the deposit in the recovery scan.
    pub index: u64,
    /// Child index the secrets were derived at (0 for an original deposit).
    pub derivation_depth: u64,
    pub nullifier: Felt,
    pub secret: Felt,
    pub precommitment_hash: Felt,
    pub value: u128,
    pub label: Felt,
    pub block_number: u64,
    pub tx_hash: String,
}

/// The currently spendable tip of a lineage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActiveDeposit {
    pub label: Felt,
    pub value: u128,
    pub derivation_depth: u64,
    pub commitment: Felt,
    pub nullifier: Felt,
    pub secret: Felt,
}

/// Mutable cursor for one lineage trace.
#[derive(Clone, Copy, Debug)]
struct LineageTip {
    value: u128,
    depth: u64,
    nullifier: Felt,
    secret: Felt,
}

/// What one trace step decided.
enum Advance {
    /// The tip is unspent; the lineage ends here.
    Active,
    /// The lineage was fully withdrawn; nothing remains.
    Closed,
    /// The tip was spent; continue from its successor.
    Next(LineageTip),
}

/// Client-side resolver for deposit lineages.
pub struct DepositChainResolver {
    indexer: Arc<dyn IndexerApi>,
    pool: String,
    chain_id: u64,
    /// Monotonically increasing identity token; bumping it abandons every
    /// in-flight trace.
    identity_epoch: AtomicU64,
}

impl DepositChainResolver {
    pub fn new(indexer: Arc<dyn IndexerApi>, pool: impl Into<String>, chain_id: u64) -> Self {
        Self {
            indexer,
            pool: pool.into(),
            chain_id,
            identity_epoch: AtomicU64::new(0),
        }
    }

    /// Invalidate in-flight traces (wallet/account switch). Returns the new
    /// epoch.
    pub fn invalidate(&self) -> u64 {
        self.identity_epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Resolve every lineage to its active tip.
    ///
    /// Lineages are traced concurrently and independently; aggregation
    /// (dedup by final commitment) happens only after all traces settle and
    /// only if the identity is still current. A lineage whose trace fails
    /// internally conservatively surfaces its last-known commitment rather
    /// than dropping funds from the caller's view.
    pub async fn resolve_active(
        &self,
        keys: &MasterKeys,
        deposits: Vec<RecoveredDeposit>,
    ) -> Result<Vec<ActiveDeposit>, ResolverError> {
        let epoch = self.identity_epoch.load(Ordering::SeqCst);

        let traces = deposits
            .into_iter()
            .map(|deposit| self.trace_lineage(keys, deposit, epoch));
        let outcomes = join_all(traces).await;

        // The identity must still be current before results are committed.
        self.check_epoch(epoch)?;

        let mut seen: HashSet<[u8; 32]> = HashSet::new();
        let mut active = Vec::new();
        for outcome in outcomes {
            if let Some(tip) = outcome? {
                if seen.insert(tip.commitment.to_bytes_be()) {
                    active.push(tip);
                }
            }
        }
        Ok(active)
    }

    /// Trace a single lineage to its tip.
    ///
    /// Internal errors (missing events, verification mismatches, indexer
    /// failures) downgrade to the conservative fallback: the last-known
    /// commitment is reported as active. Only cancellation propagates.
    async fn trace_lineage(
        &self,
        keys: &MasterKeys,
        origin: RecoveredDeposit,
        epoch: u64,
    ) -> Result<Option<ActiveDeposit>, ResolverError> {
        let label = origin.label;
        let mut tip = LineageTip {
            value: origin.value,
            depth: origin.derivation_depth,
            nullifier: origin.nullifier,
            secret: origin.secret,
        };

        for step in 0..MAX_TRACE_DEPTH {
            self.check_epoch(epoch)?;

            match self.advance(keys, label, &tip).await {
                Ok(Advance::Active) => {
                    debug!(
                        label = %felt_to_hex(&label),
                        depth = tip.depth,
                        steps = step,
                        "lineage resolved to active tip"
                    );
                    return Ok(Some(active_from(label, &tip)));
                }
                Ok(Advance::Closed) => {
                    debug!(label = %felt_to_hex(&label), "lineage fully withdrawn");
                    return Ok(None);
                }
                Ok(Advance::Next(next)) => tip = next,
                Err(ResolverError::Cancelled) => return Err(ResolverError::Cancelled),
                Err(e) => {
                    warn!(
                        label = %felt_to_hex(&label),
                        depth = tip.depth,
                        error = %e,
                        "lineage trace failed; keeping last-known commitment as active"
                    );
                    return Ok(Some(active_from(label, &tip)));
                }
            }
        }

        warn!(
            label = %felt_to_hex(&label),
            cap = MAX_TRACE_DEPTH,
            "trace depth cap reached; keeping last-known commitment as active"
        );
        Ok(Some(active_from(label, &tip)))
    }

    /// One trace step: look up the tip's spend status and compute the
    /// successor if it was spent.
    async fn advance(
        &self,
        keys: &MasterKeys,
        label: Felt,
        tip: &LineageTip,
    ) -> Result<Advance, ResolverError> {
        let hash = nullifier_hash(tip.nullifier);
        let status = self
            .indexer
            .check_nullifier(&self.pool, self.chain_id, hash)
            .await?;

        match status {
            SpendStatus::Unspent => Ok(Advance::Active),
            SpendStatus::SpentByWithdrawal(withdrawal) => {
                self.advance_withdrawal(keys, label, tip, &withdrawal)
            }
            SpendStatus::SpentByMerge(merge) => self.advance_merge(keys, label, tip, &merge),
        }
    }

    fn advance_withdrawal(
        &self,
        keys: &MasterKeys,
        label: Felt,
        tip: &LineageTip,
        withdrawal: &WithdrawalEvent,
    ) -> Result<Advance, ResolverError> {
        if is_zero_commitment(withdrawal.change_commitment) {
            return Ok(Advance::Closed);
        }

        let change_value = tip
            .value
            .checked_sub(withdrawal.withdrawn_value)
            .ok_or_else(|| {
                ResolverError::Inconsistent(format!(
                    "withdrawal in {} removes more than the commitment holds",
                    withdrawal.tx_hash
                ))
            })?;

        let child = keys.derive(label, tip.depth + 1);
        let expected = commitment_hash(change_value, label, child.precommitment());
        if expected != withdrawal.change_commitment {
            return Err(ResolverError::Inconsistent(format!(
                "change commitment in {} does not match derived secrets",
                withdrawal.tx_hash
            )));
        }

        Ok(Advance::Next(LineageTip {
            value: change_value,
            depth: tip.depth + 1,
            nullifier: child.nullifier,
            secret: child.secret,
        }))
    }

    fn advance_merge(
        &self,
        keys: &MasterKeys,
        label: Felt,
        tip: &LineageTip,
        merge: &MergeDepositEvent,
    ) -> Result<Advance, ResolverError> {
        if merge.label != label {
            return Err(ResolverError::Inconsistent(format!(
                "merge in {} carries label {} for a lineage labelled {}",
                merge.tx_hash,
                felt_to_hex(&merge.label),
                felt_to_hex(&label)
            )));
        }

        // The child index a merge used is not guaranteed to be sequential;
        // the on-chain precommitment is the ground truth. Scan forward from
        // the next index until the derived precommitment reproduces it.
        let child = (tip.depth + 1..=tip.depth + MERGE_INDEX_SCAN_LIMIT)
            .map(|index| keys.derive(label, index))
            .find(|candidate| candidate.precommitment() == merge.precommitment_hash)
            .ok_or_else(|| {
                ResolverError::Inconsistent(format!(
                    "no child index within {MERGE_INDEX_SCAN_LIMIT} of {} reproduces the \
                     precommitment of merge {}",
                    tip.depth, merge.tx_hash
                ))
            })?;

        let merged_value = tip.value.checked_add(merge.value).ok_or_else(|| {
            ResolverError::Inconsistent(format!("merged value overflows in {}", merge.tx_hash))
        })?;
        let expected = commitment_hash(merged_value, label, merge.precommitment_hash);
        if expected != merge.commitment {
            return Err(ResolverError::Inconsistent(format!(
                "merged commitment in {} does not match derived secrets",
                merge.tx_hash
            )));
        }

        Ok(Advance::Next(LineageTip {
            value: merged_value,
            depth: child.index,
            nullifier: child.nullifier,
            secret: child.secret,
        }))
    }

    fn check_epoch(&self, token: u64) -> Result<(), ResolverError> {
        if self.identity_epoch.load(Ordering::SeqCst) != token {
            Err(ResolverError::Cancelled)
        } else {
            Ok(())
        }
    }
}

fn active_from(label: Felt, tip: &LineageTip) -> ActiveDeposit {
    let precommitment = precommitment_hash(tip.nullifier, tip.secret);
    ActiveDeposit {
        label,
        value: tip.value,
        derivation_depth: tip.depth,
        commitment: commitment_hash(tip.value, label, precommitment),
        nullifier: tip.nullifier,
        secret: tip.secret,
    }
}
