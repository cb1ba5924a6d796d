//! veilpool-asp worker
//!
//! Long-lived sync loop for the association set provider:
//! 1. Ingest new deposit labels from the indexer
//! 2. Reconcile local state against the on-chain root
//! 3. Push the local root on-chain when it diverges, with bounded retries

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use veilpool_asp::{AspConfig, AspError, AspTreeManager, SqliteMirror, StarknetAspContract};
use veilpool_common::HttpIndexer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "veilpool_asp=info".into()),
        )
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = AspConfig::from_env()?;

    info!("Starting veilpool-asp worker");
    info!("Indexer: {}", config.indexer_url);
    info!("Pool: {} (chain {})", config.pool, config.chain_id);

    let indexer = Arc::new(
        HttpIndexer::new(&config.indexer_url)
            .map_err(|e| anyhow::anyhow!("indexer client setup failed: {e}"))?,
    );
    let contract = Arc::new(StarknetAspContract::new(
        &config.rpc_url,
        &config.entrypoint_address,
        &config.signer_private_key,
        &config.signer_address,
        &config.starknet_chain,
    )?);
    let mirror = Arc::new(SqliteMirror::open(&config.mirror_path)?);

    let manager = AspTreeManager::new(
        config.pool.clone(),
        config.chain_id,
        indexer,
        contract,
        mirror,
        config.min_signer_balance,
        config.page_size,
    );

    let report = manager.initialize().await?;
    info!(
        labels = report.labels_loaded,
        source = ?report.source,
        "association set ready"
    );

    let mut ticker = tokio::time::interval(Duration::from_secs(config.poll_interval_secs));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match run_cycle(&manager, &config).await {
                    Ok(()) => {}
                    Err(e) if e.is_fatal() => {
                        error!(error = %e, "fatal error; shutting down");
                        return Err(e.into());
                    }
                    Err(e) => {
                        warn!(error = %e, "sync cycle failed; will retry next tick");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down veilpool-asp worker");
                break;
            }
        }
    }

    Ok(())
}

async fn run_cycle(manager: &AspTreeManager, config: &AspConfig) -> Result<(), AspError> {
    manager.process_new_deposits().await?;
    manager.reconcile().await?;
    manager
        .update_on_chain_root_with_retry(config.max_update_attempts, &config.metadata_cid)
        .await?;

    let status = manager.status().await;
    info!(
        size = status.size,
        depth = status.depth,
        last_block = status.last_processed_block,
        synced = ?status.synced,
        "sync cycle complete"
    );
    Ok(())
}
