use jsonrpc_core::error::Error as JsonRpcError;
use std::sync::atomic::{AtomicU64, Ordering};

use ckb_jsonrpc_types::{
    BlockNumber, BlockView, CellWithStatus, HeaderView, JsonBytes, OutPoint, OutputsValidator,
    Status, Transaction, TransactionView, Uint32,
};
use ckb_types::H256;
use serde::Deserialize;

use super::collector::{CellsCapacity, IndexerCell, Pagination, SearchKey};

lazy_static::lazy_static! {
    pub static ref HTTP_CLIENT: reqwest::Client = reqwest::Client::builder()
        .timeout(::std::time::Duration::from_secs(30))
        .build()
        .unwrap_or_default();
}

#[derive(Debug)]
pub struct IdGenerator {
    state: AtomicU64,
}

impl Default for IdGenerator {
    fn default() -> Self {
        IdGenerator {
            state: AtomicU64::new(1),
        }
    }
}

impl IdGenerator {
    pub fn new() -> IdGenerator {
        IdGenerator::default()
    }

    pub fn next(&self) -> u64 {
        self.state.fetch_add(1, Ordering::SeqCst)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("rpc error {}: {}", .0.code.code(), .0.message)]
    Response(JsonRpcError),
    #[error("unexpected response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// `get_transaction` result, only the parts this crate reads.
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionWithStatus {
    #[serde(default)]
    pub transaction: Option<TransactionView>,
    pub tx_status: TxStatusView,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TxStatusView {
    pub status: Status,
    #[serde(default)]
    pub block_hash: Option<H256>,
    #[serde(default)]
    pub reason: Option<String>,
}

macro_rules! jsonrpc {
    (
        $(#[$struct_attr:meta])*
        pub struct $struct_name:ident {$(
            $(#[$attr:meta])*
            pub fn $method:ident(&$selff:ident $(, $arg_name:ident: $arg_ty:ty)*)
                -> $return_ty:ty;
        )*}
    ) => (
        $(#[$struct_attr])*
        pub struct $struct_name {
            pub client: reqwest::Client,
            pub url: reqwest::Url,
            pub id_generator: $crate::chain::rpc::IdGenerator,
        }

        impl $struct_name {
            pub fn new(url: reqwest::Url) -> Self {
                Self::with_client(url, $crate::chain::rpc::HTTP_CLIENT.clone())
            }

            pub fn with_client(url: reqwest::Url, client: reqwest::Client) -> Self {
                let id_generator = $crate::chain::rpc::IdGenerator::new();
                $struct_name { url, id_generator, client }
            }

            $(
                $(#[$attr])*
                pub async fn $method(&$selff $(, $arg_name: $arg_ty)*) -> Result<$return_ty, $crate::chain::rpc::RpcError> {
                    let method = String::from(stringify!($method));
                    let params = serialize_parameters!($($arg_name,)*);
                    let id = $selff.id_generator.next();

                    let mut req_json = serde_json::Map::new();
                    req_json.insert("id".to_owned(), serde_json::json!(id));
                    req_json.insert("jsonrpc".to_owned(), serde_json::json!("2.0"));
                    req_json.insert("method".to_owned(), serde_json::json!(method));
                    req_json.insert("params".to_owned(), params);

                    let resp = $selff.client.post($selff.url.clone()).json(&req_json).send().await?;
                    let output = resp.json::<jsonrpc_core::response::Output>().await?;
                    match output {
                        jsonrpc_core::response::Output::Success(success) => {
                            serde_json::from_value(success.result).map_err(Into::into)
                        },
                        jsonrpc_core::response::Output::Failure(failure) => {
                            Err($crate::chain::rpc::RpcError::Response(failure.error))
                        }
                    }
                }
            )*
        }
    )
}

macro_rules! serialize_parameters {
    () => ( serde_json::Value::Array(Vec::new()) );
    ($($arg_name:ident,)+) => ( serde_json::to_value(($($arg_name,)+))?)
}

jsonrpc!(pub struct RpcClient {
    pub fn get_transaction(&self, hash: H256) -> Option<TransactionWithStatus>;
    pub fn send_transaction(&self, tx: Transaction, outputs_validator: Option<OutputsValidator>) -> H256;
    pub fn get_live_cell(&self, out_point: OutPoint, with_data: bool) -> CellWithStatus;
    pub fn get_block_by_number(&self, number: BlockNumber) -> Option<BlockView>;
    pub fn get_header(&self, block_hash: H256) -> Option<HeaderView>;
    pub fn get_cells(&self, search_key: SearchKey, order: String, limit: Uint32, after_cursor: Option<JsonBytes>) -> Pagination<IndexerCell>;
    pub fn get_cells_capacity(&self, search_key: SearchKey) -> Option<CellsCapacity>;
});
