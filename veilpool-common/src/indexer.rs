//! Read client for the pool indexer.
//!
//! The indexer exposes paginated views over on-chain events (deposits,
//! withdrawals, merge-deposits) ordered ascending by `(blockNumber,
//! logIndex)`, plus a point lookup for nullifier spend status. All field
//! elements travel as `0x`-prefixed hex strings; payloads are camelCase
//! JSON.

use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::felt::{felt_hex, felt_to_hex, Felt};

/// Default per-request timeout for indexer calls.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Errors from the indexer read API.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("indexer request failed: {0}")]
    Http(String),
    #[error("indexer returned status {0}")]
    Status(u16),
    #[error("indexer response decode failed: {0}")]
    Decode(String),
}

/// One page of an event listing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub data: Vec<T>,
    pub has_more: bool,
}

/// A deposit event: a new lineage entering the pool.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositEvent {
    pub depositor: String,
    #[serde(with = "felt_hex")]
    pub commitment: Felt,
    #[serde(with = "felt_hex")]
    pub label: Felt,
    pub value: u128,
    #[serde(with = "felt_hex")]
    pub precommitment_hash: Felt,
    pub block_number: u64,
    pub log_index: u32,
    pub tx_hash: String,
}

/// A withdrawal spending a commitment, optionally leaving change.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalEvent {
    #[serde(with = "felt_hex")]
    pub spent_nullifier_hash: Felt,
    /// Zero when the withdrawal drained the lineage completely.
    #[serde(with = "felt_hex")]
    pub change_commitment: Felt,
    pub withdrawn_value: u128,
    pub block_number: u64,
    pub log_index: u32,
    pub tx_hash: String,
}

/// A merge-deposit consolidating new value into an existing commitment.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeDepositEvent {
    /// Nullifier hash of the commitment the merge consumed.
    #[serde(with = "felt_hex")]
    pub existing_nullifier_hash: Felt,
    /// The resulting merged commitment.
    #[serde(with = "felt_hex")]
    pub commitment: Felt,
    #[serde(with = "felt_hex")]
    pub label: Felt,
    /// Value deposited by the merge (on top of the existing commitment).
    pub value: u128,
    #[serde(with = "felt_hex")]
    pub precommitment_hash: Felt,
    pub block_number: u64,
    pub log_index: u32,
    pub tx_hash: String,
}

/// Spend status of a single nullifier hash.
#[derive(Clone, Debug)]
pub enum SpendStatus {
    Unspent,
    SpentByWithdrawal(WithdrawalEvent),
    SpentByMerge(MergeDepositEvent),
}

/// Paginated read access to pool events.
#[async_trait]
pub trait IndexerApi: Send + Sync {
    async fn list_deposits(
        &self,
        pool: &str,
        chain_id: u64,
        limit: u32,
        offset: u64,
    ) -> Result<Page<DepositEvent>, IndexerError>;

    async fn list_withdrawals(
        &self,
        pool: &str,
        chain_id: u64,
        limit: u32,
        offset: u64,
    ) -> Result<Page<WithdrawalEvent>, IndexerError>;

    async fn list_merge_deposits(
        &self,
        pool: &str,
        chain_id: u64,
        limit: u32,
        offset: u64,
    ) -> Result<Page<MergeDepositEvent>, IndexerError>;

    async fn check_nullifier(
        &self,
        pool: &str,
        chain_id: u64,
        nullifier_hash: Felt,
    ) -> Result<SpendStatus, IndexerError>;
}

/// Wire shape of the nullifier lookup.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NullifierStatusDto {
    spent: bool,
    spent_by: Option<String>,
    withdrawal: Option<WithdrawalEvent>,
    merge_deposit: Option<MergeDepositEvent>,
}

impl NullifierStatusDto {
    fn into_status(self) -> Result<SpendStatus, IndexerError> {
        if !self.spent {
            return Ok(SpendStatus::Unspent);
        }
        match self.spent_by.as_deref() {
            Some("withdrawal") => self
                .withdrawal
                .map(SpendStatus::SpentByWithdrawal)
                .ok_or_else(|| {
                    IndexerError::Decode("spent by withdrawal but no withdrawal record".into())
                }),
            Some("merge") => self
                .merge_deposit
                .map(SpendStatus::SpentByMerge)
                .ok_or_else(|| {
                    IndexerError::Decode("spent by merge but no merge-deposit record".into())
                }),
            other => Err(IndexerError::Decode(format!(
                "unknown spentBy value {other:?}"
            ))),
        }
    }
}

/// HTTP implementation of [`IndexerApi`].
pub struct HttpIndexer {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpIndexer {
    /// Create a client with the default request timeout.
    pub fn new(base_url: &str) -> Result<Self, IndexerError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    /// Create a client with an explicit per-request timeout.
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, IndexerError> {
        // A trailing slash keeps Url::join from eating the last path segment.
        let mut normalized = base_url.to_string();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        let base_url = Url::parse(&normalized)
            .map_err(|e| IndexerError::Http(format!("invalid indexer url: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IndexerError::Http(e.to_string()))?;
        Ok(Self { client, base_url })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, IndexerError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| IndexerError::Http(e.to_string()))?;
        debug!(%url, "indexer request");
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| IndexerError::Http(e.to_string()))?;
        if !response.status().is_success() {
            return Err(IndexerError::Status(response.status().as_u16()));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| IndexerError::Decode(e.to_string()))
    }

    fn page_query(chain_id: u64, limit: u32, offset: u64) -> Vec<(&'static str, String)> {
        vec![
            ("chainId", chain_id.to_string()),
            ("limit", limit.to_string()),
            ("offset", offset.to_string()),
        ]
    }
}

#[async_trait]
impl IndexerApi for HttpIndexer {
    async fn list_deposits(
        &self,
        pool: &str,
        chain_id: u64,
        limit: u32,
        offset: u64,
    ) -> Result<Page<DepositEvent>, IndexerError> {
        self.get_json(
            &format!("pools/{pool}/deposits"),
            &Self::page_query(chain_id, limit, offset),
        )
        .await
    }

    async fn list_withdrawals(
        &self,
        pool: &str,
        chain_id: u64,
        limit: u32,
        offset: u64,
    ) -> Result<Page<WithdrawalEvent>, IndexerError> {
        self.get_json(
            &format!("pools/{pool}/withdrawals"),
            &Self::page_query(chain_id, limit, offset),
        )
        .await
    }

    async fn list_merge_deposits(
        &self,
        pool: &str,
        chain_id: u64,
        limit: u32,
        offset: u64,
    ) -> Result<Page<MergeDepositEvent>, IndexerError> {
        self.get_json(
            &format!("pools/{pool}/merge-deposits"),
            &Self::page_query(chain_id, limit, offset),
        )
        .await
    }

    async fn check_nullifier(
        &self,
        pool: &str,
        chain_id: u64,
        nullifier_hash: Felt,
    ) -> Result<SpendStatus, IndexerError> {
        let dto: NullifierStatusDto = self
            .get_json(
                &format!("pools/{pool}/nullifiers/{}", felt_to_hex(&nullifier_hash)),
                &[("chainId", chain_id.to_string())],
            )
            .await?;
        dto.into_status()
    }
}
