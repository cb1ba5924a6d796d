//! On-chain contract surface for the association set provider.
//!
//! The entrypoint contract holds the authoritative ASP root. The manager
//! reads `latest_root`/`current_tree_depth`, checks the signer can pay for
//! gas, and submits `update_root(root, metadata)` transactions, waiting for
//! the receipt and treating a confirmed-but-reverted transaction as an
//! error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use starknet::{
    accounts::{Account, Call, ExecutionEncoding, SingleOwnerAccount},
    core::types::{
        BlockId, BlockTag, ExecutionResult, FieldElement, FunctionCall,
        MaybePendingTransactionReceipt, TransactionReceipt,
    },
    core::utils::{cairo_short_string_to_felt, get_selector_from_name},
    providers::{
        jsonrpc::{HttpTransport, JsonRpcClient},
        Provider,
    },
    signers::{LocalWallet, SigningKey},
};
use starknet_crypto::poseidon_hash_many;
use tracing::{debug, info, warn};
use url::Url;
use veilpool_common::{felt_to_hex, Felt};

use crate::error::AspError;

/// ETH fee token contract (same address on mainnet and testnets).
const ETH_TOKEN_ADDRESS: &str =
    "0x049d36570d4e46f48e99674bd3fcc84644ddd6b96f7c741b1562b82f9e004dc7";

/// How often to poll for a transaction receipt.
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// How many receipt polls before giving up.
const RECEIPT_POLL_LIMIT: u32 = 40;

/// A confirmed on-chain root update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RootUpdate {
    pub tx_hash: String,
    /// Index the contract assigned to the new root.
    pub index: u64,
}

/// Read/write access to the ASP entrypoint contract.
#[async_trait]
pub trait AspContract: Send + Sync {
    /// Latest approved-label root the contract holds.
    async fn latest_root(&self) -> Result<Felt, AspError>;

    /// Depth the contract's tree currently reports.
    async fn current_tree_depth(&self) -> Result<u64, AspError>;

    /// Submit a new root, wait for confirmation, and fail on revert.
    async fn update_root(&self, root: Felt, metadata_cid: &str) -> Result<RootUpdate, AspError>;

    /// Address of the transaction signer.
    fn signer_address(&self) -> String;

    /// Fee-token balance of the signer.
    async fn signer_balance(&self) -> Result<u128, AspError>;
}

/// Starknet JSON-RPC implementation of [`AspContract`].
pub struct StarknetAspContract {
    provider: Arc<JsonRpcClient<HttpTransport>>,
    account: SingleOwnerAccount<JsonRpcClient<HttpTransport>, LocalWallet>,
    entrypoint: FieldElement,
    fee_token: FieldElement,
}

impl StarknetAspContract {
    /// Create a contract client.
    ///
    /// `chain` is the short-string chain identifier (e.g. `SN_SEPOLIA`).
    pub fn new(
        rpc_url: &str,
        entrypoint_address: &str,
        signer_private_key: &str,
        signer_address: &str,
        chain: &str,
    ) -> Result<Self, AspError> {
        let url: Url = rpc_url
            .parse()
            .map_err(|e| AspError::Config(format!("invalid RPC URL: {e}")))?;
        let provider = Arc::new(JsonRpcClient::new(HttpTransport::new(url.clone())));
        let account_provider = JsonRpcClient::new(HttpTransport::new(url));

        let entrypoint = FieldElement::from_hex_be(entrypoint_address)
            .map_err(|e| AspError::Config(format!("invalid entrypoint address: {e}")))?;
        let key = FieldElement::from_hex_be(signer_private_key)
            .map_err(|_| AspError::Config("invalid signer private key".into()))?;
        let address = FieldElement::from_hex_be(signer_address)
            .map_err(|e| AspError::Config(format!("invalid signer address: {e}")))?;
        let chain_id = cairo_short_string_to_felt(chain)
            .map_err(|e| AspError::Config(format!("invalid chain identifier {chain}: {e}")))?;
        let fee_token = FieldElement::from_hex_be(ETH_TOKEN_ADDRESS)
            .map_err(|e| AspError::Config(format!("invalid fee token address: {e}")))?;

        let signer = LocalWallet::from(SigningKey::from_secret_scalar(key));
        let account = SingleOwnerAccount::new(
            account_provider,
            signer,
            address,
            chain_id,
            ExecutionEncoding::New,
        );

        Ok(Self {
            provider,
            account,
            entrypoint,
            fee_token,
        })
    }

    async fn call_entrypoint(
        &self,
        selector: &str,
        calldata: Vec<FieldElement>,
    ) -> Result<Vec<FieldElement>, AspError> {
        let entry_point_selector = get_selector_from_name(selector)
            .map_err(|e| AspError::Config(format!("bad selector {selector}: {e}")))?;
        self.provider
            .call(
                FunctionCall {
                    contract_address: self.entrypoint,
                    entry_point_selector,
                    calldata,
                },
                BlockId::Tag(BlockTag::Latest),
            )
            .await
            .map_err(|e| AspError::Transient(format!("{selector} call failed: {e}")))
    }

    async fn wait_for_receipt(&self, tx_hash: FieldElement) -> Result<TransactionReceipt, AspError> {
        for _ in 0..RECEIPT_POLL_LIMIT {
            tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
            match self.provider.get_transaction_receipt(tx_hash).await {
                Ok(MaybePendingTransactionReceipt::Receipt(receipt)) => return Ok(receipt),
                // Pending or not yet indexed by the node; keep polling.
                Ok(MaybePendingTransactionReceipt::PendingReceipt(_)) | Err(_) => continue,
            }
        }
        Err(AspError::Transient(format!(
            "timed out waiting for receipt of {}",
            felt_to_hex(&tx_hash)
        )))
    }
}

#[async_trait]
impl AspContract for StarknetAspContract {
    async fn latest_root(&self) -> Result<Felt, AspError> {
        let result = self.call_entrypoint("latest_root", vec![]).await?;
        result
            .first()
            .copied()
            .ok_or_else(|| AspError::Transient("empty latest_root response".into()))
    }

    async fn current_tree_depth(&self) -> Result<u64, AspError> {
        let result = self.call_entrypoint("current_tree_depth", vec![]).await?;
        let depth = result
            .first()
            .ok_or_else(|| AspError::Transient("empty current_tree_depth response".into()))?;
        Ok(felt_to_u64(depth))
    }

    async fn update_root(&self, root: Felt, metadata_cid: &str) -> Result<RootUpdate, AspError> {
        let selector = get_selector_from_name("update_root")
            .map_err(|e| AspError::Config(format!("bad selector update_root: {e}")))?;
        let call = Call {
            to: self.entrypoint,
            selector,
            calldata: vec![root, cid_digest(metadata_cid)],
        };

        let result = self
            .account
            .execute(vec![call])
            .send()
            .await
            .map_err(|e| AspError::Transient(format!("update_root submission failed: {e}")))?;
        let tx_hash = result.transaction_hash;
        info!(
            tx = %felt_to_hex(&tx_hash),
            root = %felt_to_hex(&root),
            "root update submitted; waiting for confirmation"
        );

        let receipt = self.wait_for_receipt(tx_hash).await?;
        let invoke = match receipt {
            TransactionReceipt::Invoke(invoke) => invoke,
            other => {
                return Err(AspError::Transient(format!(
                    "unexpected receipt type: {other:?}"
                )))
            }
        };
        if let ExecutionResult::Reverted { reason } = &invoke.execution_result {
            warn!(tx = %felt_to_hex(&tx_hash), reason = %reason, "root update reverted");
            return Err(AspError::Reverted(felt_to_hex(&tx_hash)));
        }

        // The contract emits RootUpdated(index, root, metadata) on success.
        let root_updated_key = get_selector_from_name("RootUpdated")
            .map_err(|e| AspError::Config(format!("bad event key RootUpdated: {e}")))?;
        let index = invoke
            .events
            .iter()
            .find(|event| {
                event.from_address == self.entrypoint
                    && event.keys.first() == Some(&root_updated_key)
            })
            .and_then(|event| event.data.first())
            .map(felt_to_u64)
            .ok_or_else(|| {
                AspError::Transient(format!(
                    "root update {} confirmed without a RootUpdated event",
                    felt_to_hex(&tx_hash)
                ))
            })?;

        debug!(index, "root update confirmed");
        Ok(RootUpdate {
            tx_hash: felt_to_hex(&tx_hash),
            index,
        })
    }

    fn signer_address(&self) -> String {
        felt_to_hex(&self.account.address())
    }

    async fn signer_balance(&self) -> Result<u128, AspError> {
        let selector = get_selector_from_name("balanceOf")
            .map_err(|e| AspError::Config(format!("bad selector balanceOf: {e}")))?;
        let result = self
            .provider
            .call(
                FunctionCall {
                    contract_address: self.fee_token,
                    entry_point_selector: selector,
                    calldata: vec![self.account.address()],
                },
                BlockId::Tag(BlockTag::Latest),
            )
            .await
            .map_err(|e| AspError::Transient(format!("balanceOf call failed: {e}")))?;

        // ERC-20 returns (low, high) for u256.
        match result.as_slice() {
            [low, high, ..] => {
                if felt_to_u128(high) > 0 {
                    Ok(u128::MAX) // Saturate if balance exceeds u128.
                } else {
                    Ok(felt_to_u128(low))
                }
            }
            [single] => Ok(felt_to_u128(single)),
            [] => Err(AspError::Transient("empty balanceOf response".into())),
        }
    }
}

/// Commit a metadata CID string as a single field element.
///
/// CIDs exceed one field element, so the calldata carries a Poseidon digest
/// of the CID bytes in 31-byte chunks.
fn cid_digest(cid: &str) -> FieldElement {
    let chunks: Vec<FieldElement> = cid
        .as_bytes()
        .chunks(31)
        .map(|chunk| FieldElement::from_byte_slice_be(chunk).expect("31-byte chunk fits in a felt"))
        .collect();
    if chunks.is_empty() {
        FieldElement::ZERO
    } else {
        poseidon_hash_many(&chunks)
    }
}

/// Convert a field element to u64, truncating to the low 64 bits.
fn felt_to_u64(felt: &FieldElement) -> u64 {
    let bytes = felt.to_bytes_be();
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[24..32]);
    u64::from_be_bytes(buf)
}

/// Convert a field element to u128, truncating to the low 128 bits.
fn felt_to_u128(felt: &FieldElement) -> u128 {
    let bytes = felt.to_bytes_be();
    let mut buf = [0u8; 16];
    buf.copy_from_slice(&bytes[16..32]);
    u128::from_be_bytes(buf)
}
