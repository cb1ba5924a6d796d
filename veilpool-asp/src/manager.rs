//! Approved-label tree manager.
//!
//! Owns the in-memory association set tree, its durable mirror, and the
//! on-chain root reconciliation. The manager is an explicit service object:
//! one instance is constructed at process start and handed to every caller
//! by reference, so there is no global tree to race on.
//!
//! The tree's root depends on the order labels were inserted. The durable
//! mirror stores an unordered label set, so it is never used to reconstruct
//! the tree; rebuilds always replay the indexer's ordered deposit feed (see
//! [`crate::mirror::OrderedRebuildSource`]).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use veilpool_common::{
    felt_to_hex, Felt, IndexerApi, LeanImt, MerkleProof, Page, TreeError,
};

use crate::chain::{AspContract, RootUpdate};
use crate::error::AspError;
use crate::mirror::{MembershipCache, OrderedRebuildSource};

/// Base delay for the retry wrapper; doubles on each attempt.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// How many historical prefix roots to scan when matching the on-chain root
/// against local state.
const MAX_ROOT_LOOKBACK: u64 = 512;

/// Where the label set came from during initialization.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitSource {
    /// Full ordered replay of the indexer's deposit feed.
    Indexer,
    /// The manager was already initialized; nothing was loaded.
    AlreadyInitialized,
}

/// Outcome of [`AspTreeManager::initialize`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InitReport {
    pub source: InitSource,
    pub labels_loaded: u64,
}

/// Snapshot of local and on-chain sync state.
#[derive(Clone, Debug)]
pub struct AspStatus {
    pub local_root: Felt,
    pub size: u64,
    pub depth: usize,
    pub last_processed_block: u64,
    /// Best-effort; `None` when the chain read failed.
    pub on_chain_root: Option<Felt>,
    /// Best-effort; `None` when the chain read failed.
    pub on_chain_tree_depth: Option<u64>,
    /// `Some(true)` when local and on-chain roots match; `None` when the
    /// on-chain root could not be read.
    pub synced: Option<bool>,
}

struct TreeState {
    tree: LeanImt,
    last_block: u64,
}

/// The association set tree manager.
pub struct AspTreeManager {
    pool: String,
    chain_id: u64,
    indexer: Arc<dyn IndexerApi>,
    contract: Arc<dyn AspContract>,
    mirror: Arc<dyn MembershipCache>,
    state: RwLock<TreeState>,
    /// Guards initialization and serializes full rebuilds.
    init: Mutex<bool>,
    min_signer_balance: u128,
    page_size: u32,
}

impl AspTreeManager {
    pub fn new(
        pool: impl Into<String>,
        chain_id: u64,
        indexer: Arc<dyn IndexerApi>,
        contract: Arc<dyn AspContract>,
        mirror: Arc<dyn MembershipCache>,
        min_signer_balance: u128,
        page_size: u32,
    ) -> Self {
        Self {
            pool: pool.into(),
            chain_id,
            indexer,
            contract,
            mirror,
            state: RwLock::new(TreeState {
                tree: LeanImt::new(),
                last_block: 0,
            }),
            init: Mutex::new(false),
            min_signer_balance,
            page_size,
        }
    }

    /// Idempotent first-time setup.
    ///
    /// The first call rebuilds the tree from the indexer's ordered feed; the
    /// mirror's unordered label set cannot reconstruct insertion order and
    /// is deliberately not consulted. Subsequent calls are no-ops.
    pub async fn initialize(&self) -> Result<InitReport, AspError> {
        let mut initialized = self.init.lock().await;
        if *initialized {
            let state = self.state.read().await;
            return Ok(InitReport {
                source: InitSource::AlreadyInitialized,
                labels_loaded: state.tree.len(),
            });
        }

        let labels_loaded = self.rebuild_inner().await?;
        *initialized = true;
        info!(labels = labels_loaded, pool = %self.pool, "association set initialized");
        Ok(InitReport {
            source: InitSource::Indexer,
            labels_loaded,
        })
    }

    /// Discard all local and durable state and rebuild from the indexer.
    ///
    /// Serialized with [`initialize`](Self::initialize) and with itself via
    /// the init mutex. Readers observe either the previous tree or the fully
    /// rebuilt one; the swap happens under the write lock only after the
    /// entire ordered replay succeeded.
    pub async fn rebuild_from_deposits(&self) -> Result<u64, AspError> {
        let _guard = self.init.lock().await;
        self.rebuild_inner().await
    }

    async fn rebuild_inner(&self) -> Result<u64, AspError> {
        let deposits = self
            .indexer
            .deposits_in_order(&self.pool, self.chain_id, self.page_size)
            .await?;

        let mut tree = LeanImt::new();
        let mut labels = Vec::new();
        let mut last_block = 0u64;
        for deposit in deposits {
            last_block = last_block.max(deposit.block_number);
            match tree.insert(deposit.label) {
                Ok(_) => labels.push(deposit.label),
                Err(TreeError::DuplicateLeaf) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        {
            let mut state = self.state.write().await;
            state.tree = tree;
            state.last_block = last_block;
        }
        self.mirror.replace_labels(&self.pool, &labels, last_block)?;

        info!(
            labels = labels.len(),
            last_block,
            pool = %self.pool,
            "rebuilt association set from ordered deposit replay"
        );
        Ok(labels.len() as u64)
    }

    /// Incremental ingestion: append labels the tree has not seen yet, in
    /// arrival order, persisting each one immediately so a crash mid-batch
    /// loses at most the in-flight label.
    pub async fn process_new_deposits(&self) -> Result<u64, AspError> {
        let mut offset = 0u64;
        let mut appended = 0u64;
        loop {
            let Page { data, has_more } = self
                .indexer
                .list_deposits(&self.pool, self.chain_id, self.page_size, offset)
                .await?;
            let fetched = data.len() as u64;

            for deposit in data {
                let mut state = self.state.write().await;
                if deposit.block_number > state.last_block {
                    state.last_block = deposit.block_number;
                }
                match state.tree.insert(deposit.label) {
                    Ok(index) => {
                        let last_block = state.last_block;
                        drop(state);
                        self.mirror.insert_label(&self.pool, deposit.label)?;
                        self.mirror.set_last_processed_block(&self.pool, last_block)?;
                        appended += 1;
                        debug!(
                            label = %felt_to_hex(&deposit.label),
                            index,
                            "appended approved label"
                        );
                    }
                    Err(TreeError::DuplicateLeaf) => continue,
                    Err(e) => return Err(e.into()),
                }
            }

            if !has_more || fetched == 0 {
                break;
            }
            offset += fetched;
        }

        if appended > 0 {
            info!(appended, pool = %self.pool, "processed new deposits");
        }
        Ok(appended)
    }

    /// Push the local root on-chain if it differs.
    ///
    /// No-op when the local tree is empty or the roots already match. The
    /// signer's balance is checked before submission so an underfunded
    /// account fails fast with an actionable error instead of a chain
    /// rejection.
    pub async fn update_on_chain_root(
        &self,
        metadata_cid: &str,
    ) -> Result<Option<RootUpdate>, AspError> {
        let (local_root, size) = {
            let state = self.state.read().await;
            (state.tree.root(), state.tree.len())
        };
        if size == 0 {
            debug!(pool = %self.pool, "local tree empty; skipping root update");
            return Ok(None);
        }

        let on_chain = self.contract.latest_root().await?;
        if on_chain == local_root {
            debug!(pool = %self.pool, "on-chain root already current");
            return Ok(None);
        }

        let balance = self.contract.signer_balance().await?;
        if balance < self.min_signer_balance {
            return Err(AspError::Funding {
                address: self.contract.signer_address(),
                balance,
                required: self.min_signer_balance,
            });
        }

        let update = self.contract.update_root(local_root, metadata_cid).await?;
        info!(
            root = %felt_to_hex(&local_root),
            tx = %update.tx_hash,
            index = update.index,
            "on-chain root updated"
        );
        Ok(Some(update))
    }

    /// [`update_on_chain_root`](Self::update_on_chain_root) with exponential
    /// backoff. Configuration and funding errors are surfaced immediately;
    /// transient errors retry up to `max_attempts`.
    pub async fn update_on_chain_root_with_retry(
        &self,
        max_attempts: u32,
        metadata_cid: &str,
    ) -> Result<Option<RootUpdate>, AspError> {
        let mut last_error: Option<AspError> = None;
        for attempt in 1..=max_attempts {
            match self.update_on_chain_root(metadata_cid).await {
                Ok(update) => return Ok(update),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    warn!(attempt, max_attempts, error = %e, "root update attempt failed");
                    last_error = Some(e);
                    if attempt < max_attempts {
                        let delay = RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        Err(AspError::RetriesExhausted {
            attempts: max_attempts,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempts were made".into()),
        })
    }

    /// Membership proof for `label`, zero-padded to the circuit's fixed
    /// maximum depth.
    pub async fn generate_proof(&self, label: Felt) -> Result<MerkleProof, AspError> {
        let state = self.state.read().await;
        let index = state
            .tree
            .index_of(label)
            .ok_or_else(|| AspError::UnknownLabel(felt_to_hex(&label)))?;
        Ok(state.tree.proof(index)?)
    }

    /// Local and on-chain sync state. Chain reads are best-effort: an RPC
    /// failure degrades the corresponding fields to `None` instead of
    /// failing the call.
    pub async fn status(&self) -> AspStatus {
        let (local_root, size, depth, last_processed_block) = {
            let state = self.state.read().await;
            (
                state.tree.root(),
                state.tree.len(),
                state.tree.depth(),
                state.last_block,
            )
        };

        let on_chain_root = match self.contract.latest_root().await {
            Ok(root) => Some(root),
            Err(e) => {
                warn!(error = %e, "could not read on-chain root; reporting unknown");
                None
            }
        };
        let on_chain_tree_depth = self.contract.current_tree_depth().await.ok();
        let synced = on_chain_root.map(|root| root == local_root);

        AspStatus {
            local_root,
            size,
            depth,
            last_processed_block,
            on_chain_root,
            on_chain_tree_depth,
            synced,
        }
    }

    /// Data-inconsistency recovery: when the on-chain root cannot be
    /// reproduced from local state, force one full ordered rebuild. If the
    /// mismatch persists the caller gets an explicit out-of-sync error and
    /// should wait and retry rather than serve stale proofs.
    pub async fn reconcile(&self) -> Result<(), AspError> {
        let on_chain = self.contract.latest_root().await?;
        if on_chain == Felt::ZERO {
            // Nothing has been pushed yet.
            return Ok(());
        }
        if self.root_is_local_prefix(on_chain).await {
            return Ok(());
        }

        warn!(
            on_chain = %felt_to_hex(&on_chain),
            pool = %self.pool,
            "on-chain root unknown locally; forcing ordered rebuild"
        );
        self.rebuild_from_deposits().await?;

        if self.root_is_local_prefix(on_chain).await {
            Ok(())
        } else {
            Err(AspError::OutOfSync)
        }
    }

    /// Whether `root` is the current local root or the root of a recent
    /// insertion prefix (the on-chain root legitimately lags local state by
    /// the labels not yet pushed).
    async fn root_is_local_prefix(&self, root: Felt) -> bool {
        let state = self.state.read().await;
        if state.tree.root() == root {
            return true;
        }
        let size = state.tree.len();
        let lower = size.saturating_sub(MAX_ROOT_LOOKBACK);
        (lower..size)
            .rev()
            .any(|count| state.tree.root_at(count) == Some(root))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use veilpool_common::{
        DepositEvent, IndexerError, MergeDepositEvent, SpendStatus, WithdrawalEvent,
    };

    use super::*;
    use crate::mirror::SqliteMirror;

    fn deposit(label: u64, block: u64) -> DepositEvent {
        DepositEvent {
            depositor: "0xdepositor".into(),
            commitment: Felt::from(label * 1000),
            label: Felt::from(label),
            value: 100,
            precommitment_hash: Felt::from(label * 7),
            block_number: block,
            log_index: 0,
            tx_hash: format!("0x{label:x}"),
        }
    }

    struct MockIndexer {
        deposits: StdMutex<Vec<DepositEvent>>,
        list_calls: AtomicU32,
        fail: StdMutex<bool>,
    }

    impl MockIndexer {
        fn new(deposits: Vec<DepositEvent>) -> Self {
            Self {
                deposits: StdMutex::new(deposits),
                list_calls: AtomicU32::new(0),
                fail: StdMutex::new(false),
            }
        }

        fn push(&self, event: DepositEvent) {
            self.deposits.lock().unwrap().push(event);
        }

        fn set_fail(&self, fail: bool) {
            *self.fail.lock().unwrap() = fail;
        }
    }

    #[async_trait]
    impl IndexerApi for MockIndexer {
        async fn list_deposits(
            &self,
            _pool: &str,
            _chain_id: u64,
            limit: u32,
            offset: u64,
        ) -> Result<Page<DepositEvent>, IndexerError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            if *self.fail.lock().unwrap() {
                return Err(IndexerError::Http("indexer unavailable".into()));
            }
            let deposits = self.deposits.lock().unwrap();
            let start = (offset as usize).min(deposits.len());
            let end = (start + limit as usize).min(deposits.len());
            Ok(Page {
                data: deposits[start..end].to_vec(),
                has_more: end < deposits.len(),
            })
        }

        async fn list_withdrawals(
            &self,
            _pool: &str,
            _chain_id: u64,
            _limit: u32,
            _offset: u64,
        ) -> Result<Page<WithdrawalEvent>, IndexerError> {
            Ok(Page {
                data: vec![],
                has_more: false,
            })
        }

        async fn list_merge_deposits(
            &self,
            _pool: &str,
            _chain_id: u64,
            _limit: u32,
            _offset: u64,
        ) -> Result<Page<MergeDepositEvent>, IndexerError> {
            Ok(Page {
                data: vec![],
                has_more: false,
            })
        }

        async fn check_nullifier(
            &self,
            _pool: &str,
            _chain_id: u64,
            _nullifier_hash: Felt,
        ) -> Result<SpendStatus, IndexerError> {
            Ok(SpendStatus::Unspent)
        }
    }

    struct MockContract {
        root: StdMutex<Felt>,
        balance: StdMutex<u128>,
        fail_reads: StdMutex<bool>,
        failing_updates: AtomicU32,
        update_calls: AtomicU32,
        balance_calls: AtomicU32,
    }

    impl MockContract {
        fn new() -> Self {
            Self {
                root: StdMutex::new(Felt::ZERO),
                balance: StdMutex::new(u128::MAX),
                fail_reads: StdMutex::new(false),
                failing_updates: AtomicU32::new(0),
                update_calls: AtomicU32::new(0),
                balance_calls: AtomicU32::new(0),
            }
        }

        fn set_root(&self, root: Felt) {
            *self.root.lock().unwrap() = root;
        }

        fn set_balance(&self, balance: u128) {
            *self.balance.lock().unwrap() = balance;
        }

        fn set_fail_reads(&self, fail: bool) {
            *self.fail_reads.lock().unwrap() = fail;
        }

        fn fail_next_updates(&self, count: u32) {
            self.failing_updates.store(count, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl AspContract for MockContract {
        async fn latest_root(&self) -> Result<Felt, AspError> {
            if *self.fail_reads.lock().unwrap() {
                return Err(AspError::Transient("rpc down".into()));
            }
            Ok(*self.root.lock().unwrap())
        }

        async fn current_tree_depth(&self) -> Result<u64, AspError> {
            if *self.fail_reads.lock().unwrap() {
                return Err(AspError::Transient("rpc down".into()));
            }
            Ok(0)
        }

        async fn update_root(
            &self,
            root: Felt,
            _metadata_cid: &str,
        ) -> Result<RootUpdate, AspError> {
            let calls = self.update_calls.fetch_add(1, Ordering::SeqCst);
            if self.failing_updates.load(Ordering::SeqCst) > 0 {
                self.failing_updates.fetch_sub(1, Ordering::SeqCst);
                return Err(AspError::Transient("nonce too low".into()));
            }
            *self.root.lock().unwrap() = root;
            Ok(RootUpdate {
                tx_hash: format!("0xtx{calls}"),
                index: calls as u64 + 1,
            })
        }

        fn signer_address(&self) -> String {
            "0xsigner".into()
        }

        async fn signer_balance(&self) -> Result<u128, AspError> {
            self.balance_calls.fetch_add(1, Ordering::SeqCst);
            Ok(*self.balance.lock().unwrap())
        }
    }

    fn manager(
        indexer: Arc<MockIndexer>,
        contract: Arc<MockContract>,
        page_size: u32,
    ) -> AspTreeManager {
        AspTreeManager::new(
            "pool-1",
            1,
            indexer,
            contract,
            Arc::new(SqliteMirror::in_memory().unwrap()),
            1_000,
            page_size,
        )
    }

    #[tokio::test]
    async fn test_initialize_rebuilds_from_indexer() {
        let indexer = Arc::new(MockIndexer::new(vec![
            deposit(1, 10),
            deposit(2, 11),
            deposit(3, 12),
        ]));
        let mgr = manager(indexer, Arc::new(MockContract::new()), 100);

        let report = mgr.initialize().await.unwrap();
        assert_eq!(report.source, InitSource::Indexer);
        assert_eq!(report.labels_loaded, 3);

        let status = mgr.status().await;
        assert_eq!(status.size, 3);
        assert_eq!(status.last_processed_block, 12);
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let indexer = Arc::new(MockIndexer::new(vec![deposit(1, 10)]));
        let mgr = manager(indexer.clone(), Arc::new(MockContract::new()), 100);

        mgr.initialize().await.unwrap();
        let calls_after_first = indexer.list_calls.load(Ordering::SeqCst);

        let report = mgr.initialize().await.unwrap();
        assert_eq!(report.source, InitSource::AlreadyInitialized);
        assert_eq!(report.labels_loaded, 1);
        assert_eq!(indexer.list_calls.load(Ordering::SeqCst), calls_after_first);
    }

    #[tokio::test]
    async fn test_rebuild_dedupes_labels_across_pages() {
        // Page size 2 puts the duplicate of label 1 on a later page.
        let indexer = Arc::new(MockIndexer::new(vec![
            deposit(1, 10),
            deposit(2, 11),
            deposit(1, 12),
            deposit(3, 13),
        ]));
        let mgr = manager(indexer, Arc::new(MockContract::new()), 2);

        let report = mgr.initialize().await.unwrap();
        assert_eq!(report.labels_loaded, 3);

        let status = mgr.status().await;
        assert_eq!(status.size, 3);
    }

    #[tokio::test]
    async fn test_rebuild_is_deterministic() {
        let feed = vec![deposit(5, 1), deposit(9, 2), deposit(2, 3)];
        let a = manager(
            Arc::new(MockIndexer::new(feed.clone())),
            Arc::new(MockContract::new()),
            100,
        );
        let b = manager(
            Arc::new(MockIndexer::new(feed)),
            Arc::new(MockContract::new()),
            100,
        );
        a.initialize().await.unwrap();
        b.initialize().await.unwrap();
        assert_eq!(a.status().await.local_root, b.status().await.local_root);
    }

    #[tokio::test]
    async fn test_rebuild_failure_commits_nothing() {
        let indexer = Arc::new(MockIndexer::new(vec![deposit(1, 10)]));
        let mgr = manager(indexer.clone(), Arc::new(MockContract::new()), 100);
        mgr.initialize().await.unwrap();
        let root_before = mgr.status().await.local_root;

        indexer.push(deposit(2, 11));
        indexer.set_fail(true);
        assert!(mgr.rebuild_from_deposits().await.is_err());

        // Old state still visible.
        let status = mgr.status().await;
        assert_eq!(status.local_root, root_before);
        assert_eq!(status.size, 1);
    }

    #[tokio::test]
    async fn test_process_new_deposits_skips_known_labels() {
        let indexer = Arc::new(MockIndexer::new(vec![deposit(1, 10), deposit(2, 11)]));
        let mgr = manager(indexer.clone(), Arc::new(MockContract::new()), 100);
        mgr.initialize().await.unwrap();

        indexer.push(deposit(2, 12)); // duplicate label
        indexer.push(deposit(3, 13));

        let appended = mgr.process_new_deposits().await.unwrap();
        assert_eq!(appended, 1);

        let status = mgr.status().await;
        assert_eq!(status.size, 3);
        assert_eq!(status.last_processed_block, 13);
    }

    #[tokio::test]
    async fn test_update_noop_when_tree_empty() {
        let contract = Arc::new(MockContract::new());
        let mgr = manager(Arc::new(MockIndexer::new(vec![])), contract.clone(), 100);
        mgr.initialize().await.unwrap();

        let update = mgr.update_on_chain_root("cid").await.unwrap();
        assert!(update.is_none());
        assert_eq!(contract.update_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_update_noop_when_roots_equal() {
        let contract = Arc::new(MockContract::new());
        let mgr = manager(
            Arc::new(MockIndexer::new(vec![deposit(1, 10)])),
            contract.clone(),
            100,
        );
        mgr.initialize().await.unwrap();
        contract.set_root(mgr.status().await.local_root);

        let update = mgr.update_on_chain_root("cid").await.unwrap();
        assert!(update.is_none());
        assert_eq!(contract.update_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_update_pushes_diverged_root() {
        let contract = Arc::new(MockContract::new());
        let mgr = manager(
            Arc::new(MockIndexer::new(vec![deposit(1, 10)])),
            contract.clone(),
            100,
        );
        mgr.initialize().await.unwrap();

        let update = mgr.update_on_chain_root("cid").await.unwrap();
        assert!(update.is_some());
        assert_eq!(mgr.status().await.synced, Some(true));
    }

    #[tokio::test]
    async fn test_underfunded_signer_fails_fast() {
        let contract = Arc::new(MockContract::new());
        contract.set_balance(1);
        let mgr = manager(
            Arc::new(MockIndexer::new(vec![deposit(1, 10)])),
            contract.clone(),
            100,
        );
        mgr.initialize().await.unwrap();

        let err = mgr.update_on_chain_root("cid").await.unwrap_err();
        match err {
            AspError::Funding {
                balance, required, ..
            } => {
                assert_eq!(balance, 1);
                assert_eq!(required, 1_000);
            }
            other => panic!("expected funding error, got {other}"),
        }
        assert_eq!(contract.update_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_funding_error_is_never_retried() {
        let contract = Arc::new(MockContract::new());
        contract.set_balance(1);
        let mgr = manager(
            Arc::new(MockIndexer::new(vec![deposit(1, 10)])),
            contract.clone(),
            100,
        );
        mgr.initialize().await.unwrap();

        let err = mgr
            .update_on_chain_root_with_retry(5, "cid")
            .await
            .unwrap_err();
        assert!(matches!(err, AspError::Funding { .. }));
        assert_eq!(contract.balance_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_retry_to_success() {
        let contract = Arc::new(MockContract::new());
        contract.fail_next_updates(2);
        let mgr = manager(
            Arc::new(MockIndexer::new(vec![deposit(1, 10)])),
            contract.clone(),
            100,
        );
        mgr.initialize().await.unwrap();

        let update = mgr
            .update_on_chain_root_with_retry(3, "cid")
            .await
            .unwrap();
        assert!(update.is_some());
        assert_eq!(contract.update_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_reports_attempt_count() {
        let contract = Arc::new(MockContract::new());
        contract.fail_next_updates(10);
        let mgr = manager(
            Arc::new(MockIndexer::new(vec![deposit(1, 10)])),
            contract.clone(),
            100,
        );
        mgr.initialize().await.unwrap();

        let err = mgr
            .update_on_chain_root_with_retry(3, "cid")
            .await
            .unwrap_err();
        match err {
            AspError::RetriesExhausted { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected retries exhausted, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_generate_proof_is_padded_and_verifies() {
        let indexer = Arc::new(MockIndexer::new(vec![
            deposit(1, 10),
            deposit(2, 11),
            deposit(3, 12),
        ]));
        let mgr = manager(indexer, Arc::new(MockContract::new()), 100);
        mgr.initialize().await.unwrap();

        let proof = mgr.generate_proof(Felt::from(2u64)).await.unwrap();
        assert_eq!(proof.siblings.len(), veilpool_common::MAX_TREE_DEPTH);
        assert!(veilpool_common::verify_proof(&proof));
        assert_eq!(proof.root, mgr.status().await.local_root);
    }

    #[tokio::test]
    async fn test_generate_proof_unknown_label() {
        let mgr = manager(
            Arc::new(MockIndexer::new(vec![deposit(1, 10)])),
            Arc::new(MockContract::new()),
            100,
        );
        mgr.initialize().await.unwrap();

        let err = mgr.generate_proof(Felt::from(99u64)).await.unwrap_err();
        assert!(matches!(err, AspError::UnknownLabel(_)));
    }

    #[tokio::test]
    async fn test_status_degrades_when_chain_unreachable() {
        let contract = Arc::new(MockContract::new());
        let mgr = manager(
            Arc::new(MockIndexer::new(vec![deposit(1, 10)])),
            contract.clone(),
            100,
        );
        mgr.initialize().await.unwrap();
        contract.set_fail_reads(true);

        let status = mgr.status().await;
        assert!(status.on_chain_root.is_none());
        assert!(status.on_chain_tree_depth.is_none());
        assert_eq!(status.synced, None);
        assert_eq!(status.size, 1);
    }

    #[tokio::test]
    async fn test_reconcile_accepts_lagging_prefix_root() {
        let indexer = Arc::new(MockIndexer::new(vec![
            deposit(1, 10),
            deposit(2, 11),
            deposit(3, 12),
        ]));
        let contract = Arc::new(MockContract::new());
        let mgr = manager(indexer.clone(), contract.clone(), 100);
        mgr.initialize().await.unwrap();

        // Chain still holds the root from before label 3 arrived.
        let prefix_root = {
            let state = mgr.state.read().await;
            state.tree.root_at(2).unwrap()
        };
        contract.set_root(prefix_root);

        let calls_before = indexer.list_calls.load(Ordering::SeqCst);
        mgr.reconcile().await.unwrap();
        // No rebuild was needed.
        assert_eq!(indexer.list_calls.load(Ordering::SeqCst), calls_before);
    }

    #[tokio::test]
    async fn test_reconcile_rebuilds_once_then_reports_out_of_sync() {
        let indexer = Arc::new(MockIndexer::new(vec![deposit(1, 10)]));
        let contract = Arc::new(MockContract::new());
        let mgr = manager(indexer.clone(), contract.clone(), 100);
        mgr.initialize().await.unwrap();

        contract.set_root(Felt::from(0xdead_beefu64));
        let calls_before = indexer.list_calls.load(Ordering::SeqCst);

        let err = mgr.reconcile().await.unwrap_err();
        assert!(matches!(err, AspError::OutOfSync));
        // Exactly one forced rebuild happened.
        assert_eq!(
            indexer.list_calls.load(Ordering::SeqCst),
            calls_before + 1
        );
    }
}
