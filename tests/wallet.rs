use axum::{extract::State, routing::post, Json, Router};
use ckb_crypto::secp::Signature;
use ckb_hash::blake2b_256;
use ckb_types::{
    bytes::Bytes,
    core::{BlockBuilder, Capacity, DepType, TransactionBuilder, TransactionView},
    packed::{self, WitnessArgs},
    prelude::*,
    H256,
};
use offckb::chain::signer::tx_sign_message;
use offckb::chain::{Amount, ChainError, CkbRpcClient, SignerKey};
use offckb::deployment::plan::ONE_CKB;
use offckb::network::Network;
use offckb::proxy::tx_hash_of;
use offckb::wallet::DEVNET_ACCOUNT_KEYS;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

/// Node and indexer stand-in serving a two transaction genesis block and
/// `cells` as the plain cells of any lock.
struct Chain {
    genesis: Value,
    cells: Vec<Value>,
    capacity: Option<u64>,
    sent: Vec<Value>,
}

type Shared = Arc<Mutex<Chain>>;

async fn node(State(chain): State<Shared>, Json(request): Json<Value>) -> Json<Value> {
    let mut chain = chain.lock().unwrap();
    let result = match request["method"].as_str() {
        Some("get_block_by_number") => chain.genesis.clone(),
        Some("get_cells") => json!({"objects": chain.cells.clone(), "last_cursor": "0x"}),
        Some("get_cells_capacity") => match chain.capacity {
            Some(capacity) => json!({
                "capacity": format!("{:#x}", capacity),
                "block_hash": format!("{:#x}", H256::default()),
                "block_number": "0x0",
            }),
            None => Value::Null,
        },
        Some("send_transaction") => {
            let tx = request["params"][0].clone();
            let hash = tx_hash_of(&tx).unwrap();
            chain.sent.push(tx);
            json!(format!("{:#x}", hash))
        }
        _ => Value::Null,
    };
    Json(json!({"jsonrpc": "2.0", "id": request["id"], "result": result}))
}

fn genesis() -> ckb_types::core::BlockView {
    let tx = |n: u8| {
        TransactionBuilder::default()
            .output(packed::CellOutput::default())
            .output_data(Bytes::from(vec![n]).pack())
            .build()
    };
    BlockBuilder::default()
        .transaction(tx(0))
        .transaction(tx(1))
        .build()
}

fn indexer_cell(lock: &packed::Script, n: u8, capacity: u64) -> Value {
    let output = packed::CellOutput::new_builder()
        .capacity(Capacity::shannons(capacity).pack())
        .lock(lock.clone())
        .build();
    json!({
        "output": ckb_jsonrpc_types::CellOutput::from(output),
        "output_data": null,
        "out_point": {"tx_hash": format!("{:#x}", H256([n; 32])), "index": "0x0"},
        "block_number": "0x1",
        "tx_index": "0x0",
    })
}

fn sender() -> SignerKey {
    SignerKey::from_hex(DEVNET_ACCOUNT_KEYS[0]).unwrap()
}

fn receiver() -> packed::Script {
    SignerKey::from_hex(DEVNET_ACCOUNT_KEYS[1])
        .unwrap()
        .lock_script()
}

/// Sender owns 100 CKB and 200 CKB.
async fn start_chain() -> (CkbRpcClient, Shared) {
    let lock = sender().lock_script();
    let chain = Arc::new(Mutex::new(Chain {
        genesis: serde_json::to_value(ckb_jsonrpc_types::BlockView::from(genesis())).unwrap(),
        cells: vec![
            indexer_cell(&lock, 1, 100 * ONE_CKB),
            indexer_cell(&lock, 2, 200 * ONE_CKB),
        ],
        capacity: Some(300 * ONE_CKB),
        sent: Vec::new(),
    }));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    let router = Router::new()
        .route("/", post(node))
        .with_state(chain.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    let url = reqwest::Url::parse(&format!("http://{}", addr)).unwrap();
    (CkbRpcClient::new(Network::Devnet, url), chain)
}

fn sent(chain: &Shared) -> Vec<TransactionView> {
    chain
        .lock()
        .unwrap()
        .sent
        .iter()
        .map(|tx| {
            let tx: ckb_jsonrpc_types::Transaction = serde_json::from_value(tx.clone()).unwrap();
            packed::Transaction::from(tx).into_view()
        })
        .collect()
}

fn capacities(tx: &TransactionView) -> Vec<u64> {
    tx.outputs()
        .into_iter()
        .map(|output| Unpack::<Capacity>::unpack(&output.capacity()).as_u64())
        .collect()
}

fn assert_signed_by(tx: &TransactionView, key: &SignerKey) {
    let witness = WitnessArgs::new_unchecked(tx.witnesses().get(0).unwrap().unpack());
    let lock: Bytes = witness.lock().to_opt().unwrap().unpack();
    let message = tx_sign_message(tx, 0, tx.inputs().len());
    let pubkey = Signature::from_slice(&lock)
        .unwrap()
        .recover(&message)
        .unwrap();
    assert_eq!(&blake2b_256(pubkey.serialize())[..20], key.lock_arg().as_bytes());
}

#[tokio::test]
async fn test_transfer_pays_receiver_and_returns_change() {
    let (client, chain) = start_chain().await;
    let tx_hash = client
        .transfer(&receiver(), Amount::Shannons(150 * ONE_CKB), &sender())
        .await
        .unwrap();

    let txs = sent(&chain);
    assert_eq!(txs.len(), 1);
    let tx = &txs[0];
    let hash: H256 = tx.hash().unpack();
    assert_eq!(hash, tx_hash);
    assert_eq!(tx.inputs().len(), 2);
    assert_eq!(tx.outputs().get(0).unwrap().lock(), receiver());
    assert_eq!(tx.outputs().get(1).unwrap().lock(), sender().lock_script());
    let outputs = capacities(tx);
    assert_eq!(outputs[0], 150 * ONE_CKB);
    let fee = 300 * ONE_CKB - outputs[0] - outputs[1];
    assert!(fee > 0 && fee < 10_000, "fee {}", fee);

    let cell_dep = tx.cell_deps().get(0).unwrap();
    assert_eq!(cell_dep.dep_type(), DepType::DepGroup.into());
    assert_eq!(cell_dep.out_point().tx_hash(), genesis().transactions()[1].hash());
    assert_eq!(Unpack::<u32>::unpack(&cell_dep.out_point().index()), 0);
    assert_signed_by(tx, &sender());
}

#[tokio::test]
async fn test_transfer_all_sweeps_into_one_output() {
    let (client, chain) = start_chain().await;
    client
        .transfer(&receiver(), Amount::All, &sender())
        .await
        .unwrap();

    let tx = sent(&chain).remove(0);
    assert_eq!(tx.inputs().len(), 2);
    let outputs = capacities(&tx);
    assert_eq!(outputs.len(), 1);
    let fee = 300 * ONE_CKB - outputs[0];
    assert!(fee > 0 && fee < 10_000, "fee {}", fee);
    assert_signed_by(&tx, &sender());
}

#[tokio::test]
async fn test_transfer_rejects_amount_below_cell_minimum() {
    let (client, chain) = start_chain().await;
    let err = client
        .transfer(&receiver(), Amount::Shannons(60 * ONE_CKB), &sender())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ChainError::AmountTooSmall { minimum, .. } if minimum == 61 * ONE_CKB
    ));
    assert!(sent(&chain).is_empty());
}

#[tokio::test]
async fn test_transfer_reports_insufficient_capacity() {
    let (client, chain) = start_chain().await;
    let err = client
        .transfer(&receiver(), Amount::Shannons(1000 * ONE_CKB), &sender())
        .await
        .unwrap_err();
    match err {
        ChainError::InsufficientCapacity { required, found } => {
            assert_eq!(required, 1061 * ONE_CKB);
            assert_eq!(found, 300 * ONE_CKB);
        }
        err => panic!("unexpected error {}", err),
    }
    assert!(sent(&chain).is_empty());
}

#[tokio::test]
async fn test_capacity_of_lock() {
    let (client, chain) = start_chain().await;
    assert_eq!(
        client.capacity_of(&sender().lock_script()).await.unwrap(),
        300 * ONE_CKB
    );
    chain.lock().unwrap().capacity = None;
    assert_eq!(client.capacity_of(&receiver()).await.unwrap(), 0);
}
