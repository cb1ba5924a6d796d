//! Worker configuration.

use anyhow::{Context, Result};
use std::env;

/// Configuration for the ASP worker, loaded from the environment.
#[derive(Clone, Debug)]
pub struct AspConfig {
    /// Indexer base URL.
    pub indexer_url: String,
    /// Starknet JSON-RPC URL.
    pub rpc_url: String,
    /// Pool identifier the worker serves.
    pub pool: String,
    /// Numeric chain id used in indexer queries.
    pub chain_id: u64,
    /// Short-string chain identifier (e.g. `SN_SEPOLIA`).
    pub starknet_chain: String,
    /// ASP entrypoint contract address.
    pub entrypoint_address: String,
    /// Root-update signer account address.
    pub signer_address: String,
    /// Root-update signer private key.
    pub signer_private_key: String,
    /// Path to the SQLite mirror database.
    pub mirror_path: String,
    /// Minimum signer fee-token balance required before submitting.
    pub min_signer_balance: u128,
    /// Page size for indexer listings.
    pub page_size: u32,
    /// Poll interval for the sync loop, in seconds.
    pub poll_interval_secs: u64,
    /// Attempt cap for root-update retries.
    pub max_update_attempts: u32,
    /// Metadata CID committed alongside each root update.
    pub metadata_cid: String,
}

impl AspConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let indexer_url =
            env::var("VEILPOOL_INDEXER_URL").context("VEILPOOL_INDEXER_URL must be set")?;
        let rpc_url = env::var("VEILPOOL_RPC_URL").context("VEILPOOL_RPC_URL must be set")?;
        let pool = env::var("VEILPOOL_POOL").context("VEILPOOL_POOL must be set")?;

        let chain_id: u64 = env::var("VEILPOOL_CHAIN_ID")
            .context("VEILPOOL_CHAIN_ID must be set")?
            .parse()
            .context("VEILPOOL_CHAIN_ID must be a number")?;

        let starknet_chain =
            env::var("VEILPOOL_STARKNET_CHAIN").unwrap_or_else(|_| "SN_SEPOLIA".to_string());

        let entrypoint_address = env::var("VEILPOOL_ENTRYPOINT_ADDRESS")
            .context("VEILPOOL_ENTRYPOINT_ADDRESS must be set")?;
        let signer_address =
            env::var("VEILPOOL_SIGNER_ADDRESS").context("VEILPOOL_SIGNER_ADDRESS must be set")?;
        let signer_private_key =
            env::var("VEILPOOL_SIGNER_KEY").context("VEILPOOL_SIGNER_KEY must be set")?;

        let mirror_path =
            env::var("VEILPOOL_MIRROR_PATH").unwrap_or_else(|_| "veilpool-asp.db".to_string());

        let min_signer_balance: u128 = env::var("VEILPOOL_MIN_SIGNER_BALANCE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1_000_000_000_000_000); // 0.001 ETH

        let page_size: u32 = env::var("VEILPOOL_PAGE_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(100);

        let poll_interval_secs: u64 = env::var("VEILPOOL_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        let max_update_attempts: u32 = env::var("VEILPOOL_MAX_UPDATE_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        let metadata_cid = env::var("VEILPOOL_METADATA_CID").unwrap_or_default();

        Ok(Self {
            indexer_url,
            rpc_url,
            pool,
            chain_id,
            starknet_chain,
            entrypoint_address,
            signer_address,
            signer_private_key,
            mirror_path,
            min_signer_balance,
            page_size,
            poll_interval_secs,
            max_update_attempts,
            metadata_cid,
        })
    }
}
