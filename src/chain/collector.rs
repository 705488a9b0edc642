use super::rpc::RpcClient;
use super::ChainError;
use ckb_jsonrpc_types::{BlockNumber, CellOutput, JsonBytes, OutPoint, Script, Uint32, Uint64};
use ckb_types::H256;
use ckb_types::{core::Capacity, packed, prelude::*};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const PAGE_LIMIT: u32 = 100;

/// Indexer search key for `get_cells`.
#[derive(Debug, Clone, Serialize)]
pub struct SearchKey {
    pub script: Script,
    pub script_type: String,
    pub filter: Option<SearchKeyFilter>,
    pub with_data: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchKeyFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_len_range: Option<[Uint64; 2]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_data_len_range: Option<[Uint64; 2]>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexerCell {
    pub output: CellOutput,
    #[serde(default)]
    pub output_data: Option<JsonBytes>,
    pub out_point: OutPoint,
    pub block_number: Uint64,
    pub tx_index: Uint32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Pagination<T> {
    pub objects: Vec<T>,
    pub last_cursor: JsonBytes,
}

/// `get_cells_capacity` result.
#[derive(Debug, Clone, Deserialize)]
pub struct CellsCapacity {
    pub capacity: Uint64,
    pub block_hash: H256,
    pub block_number: BlockNumber,
}

/// A spendable cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LiveCell {
    pub out_point: packed::OutPoint,
    pub capacity: u64,
}

impl LiveCell {
    pub fn input(&self) -> packed::CellInput {
        packed::CellInput::new_builder()
            .previous_output(self.out_point.clone())
            .build()
    }
}

impl From<IndexerCell> for LiveCell {
    fn from(cell: IndexerCell) -> Self {
        LiveCell {
            out_point: cell.out_point.into(),
            capacity: cell.output.capacity.value(),
        }
    }
}

/// Plain cells only: owned by `lock`, no type script and empty data.
pub fn plain_cells_search_key(lock: &packed::Script) -> SearchKey {
    SearchKey {
        script: lock.clone().into(),
        script_type: "lock".to_string(),
        filter: Some(SearchKeyFilter {
            script_len_range: Some([0u64.into(), 1u64.into()]),
            output_data_len_range: Some([0u64.into(), 1u64.into()]),
        }),
        with_data: false,
    }
}

/// Every cell owned by `lock`.
pub fn lock_search_key(lock: &packed::Script) -> SearchKey {
    SearchKey {
        script: lock.clone().into(),
        script_type: "lock".to_string(),
        filter: None,
        with_data: false,
    }
}

pub struct Collector<'a> {
    rpc: &'a RpcClient,
    locked_cells: HashSet<packed::OutPoint>,
}

impl<'a> Collector<'a> {
    pub fn new(rpc: &'a RpcClient) -> Self {
        Collector {
            rpc,
            locked_cells: HashSet::default(),
        }
    }

    /// Skip `out_point` in later collections, it is already used as an input.
    pub fn lock_cell(&mut self, out_point: packed::OutPoint) {
        self.locked_cells.insert(out_point);
    }

    /// Collect plain cells of `lock` until their capacity reaches `capacity`.
    pub async fn collect_live_cells(
        &mut self,
        lock: &packed::Script,
        capacity: Capacity,
    ) -> Result<Vec<LiveCell>, ChainError> {
        self.collect(lock, Some(capacity.as_u64())).await
    }

    /// Collect every plain cell of `lock` not used yet.
    pub async fn collect_all(&mut self, lock: &packed::Script) -> Result<Vec<LiveCell>, ChainError> {
        self.collect(lock, None).await
    }

    async fn collect(
        &mut self,
        lock: &packed::Script,
        capacity: Option<u64>,
    ) -> Result<Vec<LiveCell>, ChainError> {
        let search_key = plain_cells_search_key(lock);
        let mut live_cells = Vec::new();
        let mut collected_capacity = 0u64;
        let mut cursor: Option<JsonBytes> = None;
        loop {
            let page = self
                .rpc
                .get_cells(
                    search_key.clone(),
                    "asc".to_string(),
                    PAGE_LIMIT.into(),
                    cursor.take(),
                )
                .await?;
            let exhausted = page.objects.len() < PAGE_LIMIT as usize;
            for cell in page.objects {
                if cell.output.type_.is_some() {
                    continue;
                }
                let cell: LiveCell = cell.into();
                // cell is in use, but not yet committed
                if !self.locked_cells.insert(cell.out_point.clone()) {
                    continue;
                }
                collected_capacity += cell.capacity;
                live_cells.push(cell);
                if capacity.map_or(false, |required| collected_capacity >= required) {
                    return Ok(live_cells);
                }
            }
            if exhausted {
                return match capacity {
                    Some(required) => Err(ChainError::InsufficientCapacity {
                        required,
                        found: collected_capacity,
                    }),
                    None => Ok(live_cells),
                };
            }
            cursor = Some(page.last_cursor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_cells_search_key() {
        let lock = packed::Script::default();
        let key = serde_json::to_value(plain_cells_search_key(&lock)).unwrap();
        assert_eq!(key["script_type"], "lock");
        assert_eq!(key["with_data"], false);
        assert_eq!(
            key["filter"]["output_data_len_range"],
            serde_json::json!(["0x0", "0x1"])
        );
        assert_eq!(
            key["filter"]["script_len_range"],
            serde_json::json!(["0x0", "0x1"])
        );
    }

    #[test]
    fn test_lock_search_key_has_no_filter() {
        let key = serde_json::to_value(lock_search_key(&packed::Script::default())).unwrap();
        assert_eq!(key["script_type"], "lock");
        assert!(key["filter"].is_null());
    }
}
