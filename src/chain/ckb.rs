use super::collector::{lock_search_key, Collector, LiveCell};
use super::rpc::RpcClient;
use super::signer::{with_placeholder_witnesses, SignerKey};
use super::{build_type_id_script, ChainClient, ChainError, DeploymentResult, TxStatus};
use crate::deployment::migration::MigrationStore;
use crate::network::Network;
use async_trait::async_trait;
use ckb_chain_spec::consensus::TYPE_ID_CODE_HASH;
use ckb_jsonrpc_types::{OutputsValidator, Status};
use ckb_types::{
    bytes::Bytes,
    core::{Capacity, DepType, ScriptHashType, TransactionBuilder, TransactionView},
    packed,
    prelude::*,
    H256,
};
use log::{debug, info};
use std::time::Duration;

/// Shannons per 1000 bytes.
pub const DEFAULT_FEE_RATE: u64 = 1000;

enum CodeCellType {
    Plain,
    NewTypeId,
    /// Consume `cell` and keep `type_script` on the new code cell.
    Upgrade {
        cell: LiveCell,
        type_script: packed::Script,
    },
}

/// How much a transfer moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Amount {
    Shannons(u64),
    /// Every plain cell of the sender, less the fee.
    All,
}

/// [`ChainClient`] backed by a node's JSON-RPC and indexer.
pub struct CkbRpcClient {
    network: Network,
    rpc: RpcClient,
    /// Migrations read when upgrading a type-id cell.
    store: Option<MigrationStore>,
    fee_rate: u64,
    poll_interval: Duration,
}

impl CkbRpcClient {
    pub fn new(network: Network, url: reqwest::Url) -> Self {
        CkbRpcClient {
            network,
            rpc: RpcClient::new(url),
            store: None,
            fee_rate: DEFAULT_FEE_RATE,
            poll_interval: super::DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_store(mut self, store: MigrationStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_fee_rate(mut self, fee_rate: u64) -> Self {
        self.fee_rate = fee_rate;
        self
    }

    /// Send requests through `client`, e.g. one configured with a proxy.
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.rpc = RpcClient::with_client(self.rpc.url.clone(), client);
        self
    }

    /// The secp256k1 dep group lives in output #0 of the second genesis transaction.
    async fn secp_dep(&self) -> Result<packed::CellDep, ChainError> {
        let genesis = self
            .rpc
            .get_block_by_number(0u64.into())
            .await?
            .ok_or_else(|| ChainError::Build("genesis block not found".to_string()))?;
        let dep_group_tx = genesis
            .transactions
            .get(1)
            .ok_or_else(|| ChainError::Build("genesis dep group tx not found".to_string()))?;
        let out_point = packed::OutPoint::new_builder()
            .tx_hash(dep_group_tx.hash.pack())
            .index(0u32.pack())
            .build();
        Ok(packed::CellDep::new_builder()
            .out_point(out_point)
            .dep_type(DepType::DepGroup.into())
            .build())
    }

    fn fee_of(&self, tx: &TransactionView) -> u64 {
        let size = with_placeholder_witnesses(tx.clone())
            .data()
            .serialized_size_in_block() as u64;
        (size * self.fee_rate + 999) / 1000
    }

    async fn deploy(
        &self,
        data: Bytes,
        key: &SignerKey,
        cell_type: CodeCellType,
    ) -> Result<DeploymentResult, ChainError> {
        let lock = key.lock_script();
        let cell_dep = self.secp_dep().await?;

        let sizing_type = match &cell_type {
            CodeCellType::Plain => None,
            CodeCellType::NewTypeId => Some(
                packed::Script::new_builder()
                    .code_hash(TYPE_ID_CODE_HASH.pack())
                    .hash_type(ScriptHashType::Type.into())
                    .args(Bytes::from(vec![0u8; 32]).pack())
                    .build(),
            ),
            CodeCellType::Upgrade { type_script, .. } => Some(type_script.clone()),
        };
        let data_capacity = Capacity::bytes(data.len()).map_err(capacity_error)?;
        let code_capacity = packed::CellOutput::new_builder()
            .lock(lock.clone())
            .type_(sizing_type.pack())
            .build()
            .occupied_capacity(data_capacity)
            .map_err(capacity_error)?
            .as_u64();
        let change_min = occupied_of(&lock)?;

        let mut collector = Collector::new(&self.rpc);
        let mut inputs = Vec::new();
        if let CodeCellType::Upgrade { cell, .. } = &cell_type {
            collector.lock_cell(cell.out_point.clone());
            inputs.push(cell.clone());
        }

        let mut fee = 0u64;
        let tx = loop {
            let input_total: u64 = inputs.iter().map(|cell| cell.capacity).sum();
            let required = code_capacity + change_min + fee;
            if input_total < required {
                let more = collector
                    .collect_live_cells(&lock, Capacity::shannons(required - input_total))
                    .await
                    .map_err(|err| with_found(err, required, input_total))?;
                inputs.extend(more);
                continue;
            }
            let type_script = match &cell_type {
                CodeCellType::Plain => None,
                CodeCellType::NewTypeId => Some(build_type_id_script(&inputs[0].input(), 0)),
                CodeCellType::Upgrade { type_script, .. } => Some(type_script.clone()),
            };
            let code_output = packed::CellOutput::new_builder()
                .capacity(Capacity::shannons(code_capacity).pack())
                .lock(lock.clone())
                .type_(type_script.pack())
                .build();
            let change_output = packed::CellOutput::new_builder()
                .capacity(Capacity::shannons(input_total - code_capacity - fee).pack())
                .lock(lock.clone())
                .build();
            let tx = TransactionBuilder::default()
                .cell_dep(cell_dep.clone())
                .inputs(inputs.iter().map(LiveCell::input))
                .outputs(vec![code_output, change_output])
                .outputs_data(vec![data.pack(), Bytes::new().pack()])
                .build();
            let tx_fee = self.fee_of(&tx);
            if tx_fee <= fee {
                break tx;
            }
            debug!("fee {} shannons for {} inputs", tx_fee, inputs.len());
            fee = tx_fee;
        };

        let tx = key.sign_tx(tx)?;
        let type_id = tx
            .outputs()
            .get(0)
            .and_then(|output| output.type_().to_opt())
            .map(|script| script.calc_script_hash().unpack());
        let tx_hash = self.send(&tx, fee).await?;
        Ok(DeploymentResult {
            tx_hash,
            index: 0,
            data_hash: packed::CellOutput::calc_data_hash(&data).unpack(),
            type_id,
            lock: lock.into(),
        })
    }

    async fn send(&self, tx: &TransactionView, fee: u64) -> Result<H256, ChainError> {
        let tx_hash = self
            .rpc
            .send_transaction(tx.data().into(), Some(OutputsValidator::Passthrough))
            .await?;
        info!("sent transaction {:#x}, fee {} shannons", tx_hash, fee);
        Ok(tx_hash)
    }

    /// Total capacity of every live cell locked by `lock`, typed cells included.
    pub async fn capacity_of(&self, lock: &packed::Script) -> Result<u64, ChainError> {
        let capacity = self.rpc.get_cells_capacity(lock_search_key(lock)).await?;
        Ok(capacity.map(|capacity| capacity.capacity.value()).unwrap_or(0))
    }

    /// Move `amount` from the plain cells of `key` to a new cell locked by `to`.
    ///
    /// The rest goes back to `key` as change, [`Amount::All`] spends every
    /// plain cell into a single output.
    pub async fn transfer(
        &self,
        to: &packed::Script,
        amount: Amount,
        key: &SignerKey,
    ) -> Result<H256, ChainError> {
        let lock = key.lock_script();
        let cell_dep = self.secp_dep().await?;
        let receiver_min = occupied_of(to)?;
        let change_min = occupied_of(&lock)?;
        let mut collector = Collector::new(&self.rpc);

        let (tx, fee) = match amount {
            Amount::Shannons(amount) => {
                if amount < receiver_min {
                    return Err(ChainError::AmountTooSmall {
                        amount,
                        minimum: receiver_min,
                    });
                }
                let mut inputs: Vec<LiveCell> = Vec::new();
                let mut fee = 0u64;
                loop {
                    let input_total: u64 = inputs.iter().map(|cell| cell.capacity).sum();
                    let required = amount + change_min + fee;
                    if input_total < required {
                        let more = collector
                            .collect_live_cells(&lock, Capacity::shannons(required - input_total))
                            .await
                            .map_err(|err| with_found(err, required, input_total))?;
                        inputs.extend(more);
                        continue;
                    }
                    let outputs = vec![
                        plain_output(to, amount),
                        plain_output(&lock, input_total - amount - fee),
                    ];
                    let tx = plain_tx(&cell_dep, &inputs, outputs);
                    let tx_fee = self.fee_of(&tx);
                    if tx_fee <= fee {
                        break (tx, fee);
                    }
                    fee = tx_fee;
                }
            }
            Amount::All => {
                let inputs = collector.collect_all(&lock).await?;
                let total: u64 = inputs.iter().map(|cell| cell.capacity).sum();
                let mut fee = 0u64;
                loop {
                    let sent = total
                        .checked_sub(fee)
                        .filter(|sent| *sent >= receiver_min)
                        .ok_or(ChainError::InsufficientCapacity {
                            required: receiver_min + fee,
                            found: total,
                        })?;
                    let tx = plain_tx(&cell_dep, &inputs, vec![plain_output(to, sent)]);
                    let tx_fee = self.fee_of(&tx);
                    if tx_fee <= fee {
                        break (tx, fee);
                    }
                    fee = tx_fee;
                }
            }
        };
        debug!("transfer with {} inputs", tx.inputs().len());
        let tx = key.sign_tx(tx)?;
        self.send(&tx, fee).await
    }

    /// Resolve the live type-id cell recorded for `contract`.
    async fn recorded_type_id_cell(
        &self,
        contract: &str,
        key: &SignerKey,
    ) -> Result<(LiveCell, packed::Script), ChainError> {
        let missing = || ChainError::MissingMigration {
            contract: contract.to_string(),
            network: self.network,
        };
        let store = self.store.as_ref().ok_or_else(missing)?;
        let recipe = store.find(contract, self.network)?.ok_or_else(missing)?;
        let recorded = recipe.primary().ok_or_else(missing)?;
        let type_id = recorded
            .type_id
            .clone()
            .ok_or_else(|| ChainError::MissingTypeId(contract.to_string()))?;
        let index = recorded.index.value();
        let not_found = || ChainError::LiveCellNotFound {
            tx_hash: recorded.tx_hash.clone(),
            index,
        };
        let out_point = packed::OutPoint::new_builder()
            .tx_hash(recorded.tx_hash.pack())
            .index(index.pack())
            .build();

        let cell_with_status = self
            .rpc
            .get_live_cell(out_point.clone().into(), false)
            .await?;
        if cell_with_status.status != "live" {
            return Err(not_found());
        }
        let output = cell_with_status.cell.ok_or_else(not_found)?.output;
        let type_script: packed::Script = match output.type_ {
            Some(script) => script.into(),
            None => {
                return Err(ChainError::TypeIdMismatch {
                    contract: contract.to_string(),
                    recorded: type_id,
                    actual: "no type script".to_string(),
                })
            }
        };
        let actual: H256 = type_script.calc_script_hash().unpack();
        if actual != type_id {
            return Err(ChainError::TypeIdMismatch {
                contract: contract.to_string(),
                recorded: type_id,
                actual: format!("{:#x}", actual),
            });
        }
        let cell_lock: packed::Script = output.lock.into();
        if cell_lock != key.lock_script() {
            return Err(ChainError::LockMismatch {
                tx_hash: recorded.tx_hash.clone(),
                index,
            });
        }
        let cell = LiveCell {
            out_point,
            capacity: output.capacity.value(),
        };
        Ok((cell, type_script))
    }
}

fn capacity_error<E: std::fmt::Debug>(err: E) -> ChainError {
    ChainError::Build(format!("capacity overflow: {:?}", err))
}

/// Least capacity of an empty cell locked by `lock`.
fn occupied_of(lock: &packed::Script) -> Result<u64, ChainError> {
    Ok(packed::CellOutput::new_builder()
        .lock(lock.clone())
        .build()
        .occupied_capacity(Capacity::zero())
        .map_err(capacity_error)?
        .as_u64())
}

/// Count the cells already collected in an insufficient capacity error.
fn with_found(err: ChainError, required: u64, collected: u64) -> ChainError {
    match err {
        ChainError::InsufficientCapacity { found, .. } => ChainError::InsufficientCapacity {
            required,
            found: collected + found,
        },
        err => err,
    }
}

fn plain_output(lock: &packed::Script, capacity: u64) -> packed::CellOutput {
    packed::CellOutput::new_builder()
        .capacity(Capacity::shannons(capacity).pack())
        .lock(lock.clone())
        .build()
}

fn plain_tx(
    cell_dep: &packed::CellDep,
    inputs: &[LiveCell],
    outputs: Vec<packed::CellOutput>,
) -> TransactionView {
    let outputs_data: Vec<packed::Bytes> = outputs.iter().map(|_| Bytes::new().pack()).collect();
    TransactionBuilder::default()
        .cell_dep(cell_dep.clone())
        .inputs(inputs.iter().map(LiveCell::input))
        .outputs(outputs)
        .outputs_data(outputs_data)
        .build()
}

#[async_trait]
impl ChainClient for CkbRpcClient {
    fn network(&self) -> Network {
        self.network
    }

    async fn deploy_script(
        &self,
        data: Bytes,
        key: &SignerKey,
    ) -> Result<DeploymentResult, ChainError> {
        self.deploy(data, key, CodeCellType::Plain).await
    }

    async fn deploy_new_type_id_script(
        &self,
        data: Bytes,
        key: &SignerKey,
    ) -> Result<DeploymentResult, ChainError> {
        self.deploy(data, key, CodeCellType::NewTypeId).await
    }

    async fn upgrade_type_id_script(
        &self,
        contract: &str,
        data: Bytes,
        key: &SignerKey,
    ) -> Result<DeploymentResult, ChainError> {
        let (cell, type_script) = self.recorded_type_id_cell(contract, key).await?;
        self.deploy(data, key, CodeCellType::Upgrade { cell, type_script })
            .await
    }

    async fn transaction_status(&self, tx_hash: &H256) -> Result<TxStatus, ChainError> {
        let tx = match self.rpc.get_transaction(tx_hash.clone()).await? {
            Some(tx) => tx,
            None => return Ok(TxStatus::Unknown),
        };
        let status = match tx.tx_status.status {
            Status::Pending => TxStatus::Pending,
            Status::Proposed => TxStatus::Proposed,
            Status::Committed => TxStatus::Committed,
            Status::Unknown => TxStatus::Unknown,
            Status::Rejected => TxStatus::Rejected(tx.tx_status.reason.unwrap_or_default()),
        };
        Ok(status)
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}
