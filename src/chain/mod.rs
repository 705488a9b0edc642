//! Chain access used by deployments and account commands.
//!
//! [`ChainClient`] is the seam between the deployment orchestrator and a CKB
//! node. [`CkbRpcClient`] talks JSON-RPC to a real node, tests plug in their
//! own implementation.

pub mod address;
mod ckb;
pub mod collector;
pub mod rpc;
pub mod signer;

pub use address::{Address, AddressError};
pub use ckb::{Amount, CkbRpcClient};
pub use signer::SignerKey;

use crate::deployment::migration::StoreError;
use crate::network::Network;
use async_trait::async_trait;
use ckb_chain_spec::consensus::TYPE_ID_CODE_HASH;
use ckb_hash::new_blake2b;
use ckb_types::{
    bytes::Bytes,
    core::ScriptHashType,
    packed,
    prelude::*,
    H256,
};
use log::{debug, warn};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

pub const DEFAULT_CONFIRM_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("invalid private key: {0}")]
    InvalidKey(String),
    #[error(transparent)]
    Rpc(#[from] rpc::RpcError),
    #[error("insufficient capacity, required {required} shannons but only {found} shannons are spendable")]
    InsufficientCapacity { required: u64, found: u64 },
    #[error("transaction {tx_hash:#x} was rejected: {reason}")]
    Rejected { tx_hash: H256, reason: String },
    #[error("timed out after {}s waiting for transaction {tx_hash:#x}, its state is unknown, please check it manually", timeout.as_secs())]
    ConfirmTimeout { tx_hash: H256, timeout: Duration },
    #[error("no migration found for {contract} on {network}, deploy it before upgrading")]
    MissingMigration { contract: String, network: Network },
    #[error("the newest migration of {0} has no type id, it can not be upgraded")]
    MissingTypeId(String),
    #[error("type id mismatch for {contract}: recorded {recorded:#x}, live cell has {actual}")]
    TypeIdMismatch {
        contract: String,
        recorded: H256,
        actual: String,
    },
    #[error("cell {tx_hash:#x}:{index} is not live")]
    LiveCellNotFound { tx_hash: H256, index: u32 },
    #[error("cell {tx_hash:#x}:{index} is not locked by the deployer key")]
    LockMismatch { tx_hash: H256, index: u32 },
    #[error("{amount} shannons is below {minimum} shannons, the least capacity of the receiver cell")]
    AmountTooSmall { amount: u64, minimum: u64 },
    #[error("failed to build transaction: {0}")]
    Build(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// On-chain status of a transaction as seen by the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    Pending,
    Proposed,
    Committed,
    Unknown,
    Rejected(String),
}

/// What a deploy transaction put on chain. The cell is always output #0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentResult {
    pub tx_hash: H256,
    pub index: u32,
    pub data_hash: H256,
    /// Hash of the type-id script, when the cell carries one.
    pub type_id: Option<H256>,
    pub lock: ckb_jsonrpc_types::Script,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    fn network(&self) -> Network;

    /// Put `data` in a fresh cell without a type script.
    async fn deploy_script(
        &self,
        data: Bytes,
        key: &SignerKey,
    ) -> Result<DeploymentResult, ChainError>;

    /// Put `data` in a fresh cell guarded by a new type-id.
    async fn deploy_new_type_id_script(
        &self,
        data: Bytes,
        key: &SignerKey,
    ) -> Result<DeploymentResult, ChainError>;

    /// Replace the code of the type-id cell recorded for `contract`, keeping its type-id.
    async fn upgrade_type_id_script(
        &self,
        contract: &str,
        data: Bytes,
        key: &SignerKey,
    ) -> Result<DeploymentResult, ChainError>;

    async fn transaction_status(&self, tx_hash: &H256) -> Result<TxStatus, ChainError>;

    fn poll_interval(&self) -> Duration {
        DEFAULT_POLL_INTERVAL
    }

    /// Poll until `tx_hash` is committed. Query errors are retried, a rejected
    /// transaction and an elapsed `timeout` are distinct errors.
    async fn wait_for_tx_confirm(
        &self,
        tx_hash: &H256,
        timeout: Duration,
    ) -> Result<(), ChainError> {
        let interval = self.poll_interval();
        let deadline = Instant::now() + timeout;
        loop {
            match self.transaction_status(tx_hash).await {
                Ok(TxStatus::Committed) => return Ok(()),
                Ok(TxStatus::Rejected(reason)) => {
                    return Err(ChainError::Rejected {
                        tx_hash: tx_hash.clone(),
                        reason,
                    })
                }
                Ok(status) => debug!("transaction {:#x} is {:?}", tx_hash, status),
                Err(err) => warn!("query transaction {:#x} failed: {}, retrying", tx_hash, err),
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ChainError::ConfirmTimeout {
                    tx_hash: tx_hash.clone(),
                    timeout,
                });
            }
            tokio::time::sleep(interval.min(deadline - now)).await;
        }
    }
}

/// Type-id script whose args are `blake2b(first_input || output_index)`.
pub fn build_type_id_script(input: &packed::CellInput, output_index: u64) -> packed::Script {
    let mut blake2b = new_blake2b();
    blake2b.update(input.as_slice());
    blake2b.update(&output_index.to_le_bytes());
    let mut ret = [0; 32];
    blake2b.finalize(&mut ret);
    let script_arg = Bytes::from(ret.to_vec());
    packed::Script::new_builder()
        .code_hash(TYPE_ID_CODE_HASH.pack())
        .hash_type(ScriptHashType::Type.into())
        .args(script_arg.pack())
        .build()
}
