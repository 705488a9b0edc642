use super::transaction::{MockCellDep, MockInfo, MockInput, MockTransaction};
use crate::chain::rpc::RpcClient;
use anyhow::{anyhow, Context as _, Result};
use async_trait::async_trait;
use ckb_jsonrpc_types::{
    CellDep, CellOutput, DepType, HeaderView, JsonBytes, OutPoint, Transaction,
};
use ckb_types::{packed, prelude::*, H256};
use log::debug;
use std::fs;
use std::path::Path;

/// A cell as it was created, with the block it was committed in.
#[derive(Clone, Debug)]
pub struct ResolvedCell {
    pub output: CellOutput,
    pub data: JsonBytes,
    pub block_hash: Option<H256>,
}

/// Where cells and headers of a transaction are looked up.
#[async_trait]
pub trait ResourceLoader: Send + Sync {
    async fn get_cell(&self, out_point: &OutPoint) -> Result<ResolvedCell>;
    async fn get_header(&self, block_hash: &H256) -> Result<HeaderView>;
}

#[async_trait]
impl ResourceLoader for RpcClient {
    async fn get_cell(&self, out_point: &OutPoint) -> Result<ResolvedCell> {
        let index = out_point.index.value() as usize;
        let tx = self
            .get_transaction(out_point.tx_hash.clone())
            .await?
            .and_then(|tx| tx.transaction.map(|view| (view.inner, tx.tx_status.block_hash)))
            .ok_or_else(|| anyhow!("transaction {:#x} not found", out_point.tx_hash))?;
        let (tx, block_hash) = tx;
        let output = tx.outputs.get(index).cloned();
        let data = tx.outputs_data.get(index).cloned();
        match (output, data) {
            (Some(output), Some(data)) => Ok(ResolvedCell {
                output,
                data,
                block_hash,
            }),
            _ => Err(anyhow!(
                "cell {:#x}:{} not found",
                out_point.tx_hash,
                index
            )),
        }
    }

    async fn get_header(&self, block_hash: &H256) -> Result<HeaderView> {
        RpcClient::get_header(self, block_hash.clone())
            .await?
            .ok_or_else(|| anyhow!("header {:#x} not found", block_hash))
    }
}

/// Resolve every cell and header `tx` touches.
pub async fn build_mock_tx<L: ResourceLoader>(loader: &L, tx: Transaction) -> Result<MockTransaction> {
    let mut mock_info = MockInfo::default();
    for input in &tx.inputs {
        let cell = loader
            .get_cell(&input.previous_output)
            .await
            .context("resolve input")?;
        mock_info.inputs.push(MockInput {
            input: input.clone(),
            output: cell.output,
            data: cell.data,
            header: cell.block_hash,
        });
    }

    for cell_dep in &tx.cell_deps {
        let cell = loader
            .get_cell(&cell_dep.out_point)
            .await
            .context("resolve cell dep")?;
        if cell_dep.dep_type == DepType::DepGroup {
            let out_points = packed::OutPointVec::from_slice(cell.data.as_bytes())
                .map_err(|err| {
                    anyhow!(
                        "dep group {:#x}:{} has invalid data: {}",
                        cell_dep.out_point.tx_hash,
                        cell_dep.out_point.index.value(),
                        err
                    )
                })?;
            for out_point in out_points.into_iter() {
                let out_point: OutPoint = out_point.into();
                debug!(
                    "expand dep group member {:#x}:{}",
                    out_point.tx_hash,
                    out_point.index.value()
                );
                let member = loader
                    .get_cell(&out_point)
                    .await
                    .context("resolve dep group member")?;
                mock_info.cell_deps.push(MockCellDep {
                    cell_dep: CellDep {
                        out_point,
                        dep_type: DepType::Code,
                    },
                    output: member.output,
                    data: member.data,
                    header: member.block_hash,
                });
            }
        }
        mock_info.cell_deps.push(MockCellDep {
            cell_dep: cell_dep.clone(),
            output: cell.output,
            data: cell.data,
            header: cell.block_hash,
        });
    }

    for block_hash in &tx.header_deps {
        mock_info
            .header_deps
            .push(loader.get_header(block_hash).await?);
    }
    Ok(MockTransaction { mock_info, tx })
}

/// Write the mock transaction for the recorded transaction at `recorded` to
/// `output`. An existing `output` is reused.
pub async fn dump_transaction<L: ResourceLoader>(
    loader: &L,
    recorded: &Path,
    output: &Path,
) -> Result<MockTransaction> {
    if output.exists() {
        let content = fs::read_to_string(output)?;
        return serde_json::from_str(&content)
            .with_context(|| format!("invalid mock transaction {}", output.display()));
    }
    let content = fs::read_to_string(recorded).with_context(|| {
        format!(
            "transaction {} was not recorded, send it through the rpc proxy first",
            recorded.display()
        )
    })?;
    let tx: Transaction = serde_json::from_str(&content)
        .with_context(|| format!("invalid transaction {}", recorded.display()))?;
    let mock_tx = build_mock_tx(loader, tx).await?;
    if let Some(dir) = output.parent() {
        fs::create_dir_all(dir)?;
    }
    fs::write(output, serde_json::to_string_pretty(&mock_tx)?)?;
    debug!("dump transaction to {}", output.display());
    Ok(mock_tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ckb_types::{
        bytes::Bytes,
        core::{DepType as CoreDepType, TransactionBuilder},
    };
    use std::collections::HashMap;

    fn hash(n: u8) -> H256 {
        H256([n; 32])
    }

    #[derive(Default)]
    struct MemoryLoader {
        cells: HashMap<(H256, u32), Bytes>,
    }

    impl MemoryLoader {
        fn insert(&mut self, tx_hash: H256, index: u32, data: Bytes) -> packed::OutPoint {
            self.cells.insert((tx_hash.clone(), index), data);
            packed::OutPoint::new(tx_hash.pack(), index)
        }
    }

    #[async_trait]
    impl ResourceLoader for MemoryLoader {
        async fn get_cell(&self, out_point: &OutPoint) -> Result<ResolvedCell> {
            let data = self
                .cells
                .get(&(out_point.tx_hash.clone(), out_point.index.value()))
                .ok_or_else(|| anyhow!("missing cell"))?;
            Ok(ResolvedCell {
                output: packed::CellOutput::default().into(),
                data: JsonBytes::from_bytes(data.clone()),
                block_hash: Some(hash(0xb1)),
            })
        }

        async fn get_header(&self, _block_hash: &H256) -> Result<HeaderView> {
            Err(anyhow!("no headers"))
        }
    }

    #[tokio::test]
    async fn test_expand_dep_group() {
        let mut loader = MemoryLoader::default();
        let code = loader.insert(hash(1), 0, Bytes::from_static(b"code"));
        let group_data = packed::OutPointVec::new_builder()
            .push(code.clone())
            .build()
            .as_bytes();
        let group = loader.insert(hash(2), 0, group_data);
        let input = loader.insert(hash(3), 1, Bytes::new());

        let tx = TransactionBuilder::default()
            .input(packed::CellInput::new(input, 0))
            .cell_dep(
                packed::CellDep::new_builder()
                    .out_point(group)
                    .dep_type(CoreDepType::DepGroup.into())
                    .build(),
            )
            .build();
        let mock = build_mock_tx(&loader, tx.data().into()).await.unwrap();

        assert_eq!(mock.mock_info.inputs.len(), 1);
        assert_eq!(mock.mock_info.inputs[0].header, Some(hash(0xb1)));
        assert_eq!(mock.mock_info.cell_deps.len(), 2);
        let member = &mock.mock_info.cell_deps[0];
        assert_eq!(member.cell_dep.dep_type, DepType::Code);
        assert_eq!(member.cell_dep.out_point, OutPoint::from(code));
        assert_eq!(member.data.as_bytes(), b"code");
        assert_eq!(mock.mock_info.cell_deps[1].cell_dep.dep_type, DepType::DepGroup);
    }

    #[tokio::test]
    async fn test_dump_reuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut loader = MemoryLoader::default();
        let input = loader.insert(hash(3), 0, Bytes::new());
        let tx = TransactionBuilder::default()
            .input(packed::CellInput::new(input, 0))
            .build();
        let recorded = dir.path().join("recorded.json");
        fs::write(
            &recorded,
            serde_json::to_string(&Transaction::from(tx.data())).unwrap(),
        )
        .unwrap();
        let output = dir.path().join("full").join("tx.json");

        let first = dump_transaction(&loader, &recorded, &output).await.unwrap();
        assert!(output.exists());
        let second = dump_transaction(&MemoryLoader::default(), &recorded, &output)
            .await
            .unwrap();
        assert_eq!(first, second);

        let missing = dump_transaction(
            &loader,
            &dir.path().join("nope.json"),
            &dir.path().join("x.json"),
        )
        .await;
        assert!(missing.unwrap_err().to_string().contains("was not recorded"));
    }
}
