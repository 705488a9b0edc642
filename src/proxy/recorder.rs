use super::ProxyError;
use crate::util;
use ckb_types::{packed, prelude::*, H256};
use serde_json::Value;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Hash of a JSON-RPC transaction object, computed locally.
pub fn tx_hash_of(tx: &Value) -> Result<H256, ProxyError> {
    let tx: ckb_jsonrpc_types::Transaction =
        serde_json::from_value(tx.clone()).map_err(ProxyError::Decode)?;
    let tx: packed::Transaction = tx.into();
    Ok(tx.calc_tx_hash().unpack())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    New(H256),
    Existing(H256),
}

impl Recorded {
    pub fn tx_hash(&self) -> &H256 {
        match self {
            Recorded::New(hash) | Recorded::Existing(hash) => hash,
        }
    }
}

/// Transactions seen by the proxy, one `<hash>.json` each.
#[derive(Debug, Clone)]
pub struct TransactionStore {
    dir: PathBuf,
}

impl TransactionStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        TransactionStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, tx_hash: &H256) -> PathBuf {
        self.dir.join(format!("{:#x}.json", tx_hash))
    }

    /// Store `tx` under its hash, a transaction already on disk is kept as is.
    /// Keys are written in the order they were submitted.
    pub fn record(&self, tx: &Value) -> Result<Recorded, ProxyError> {
        let tx_hash = tx_hash_of(tx)?;
        let path = self.path(&tx_hash);
        if path.exists() {
            return Ok(Recorded::Existing(tx_hash));
        }
        fs::create_dir_all(&self.dir)?;
        let content = serde_json::to_string_pretty(tx).map_err(ProxyError::Decode)?;
        match util::persist_new(&self.dir, content.as_bytes(), Some(path))? {
            Some(_) => Ok(Recorded::New(tx_hash)),
            None => Ok(Recorded::Existing(tx_hash)),
        }
    }

    pub fn load(&self, tx_hash: &H256) -> Result<Option<Value>, ProxyError> {
        match fs::read_to_string(self.path(tx_hash)) {
            Ok(content) => Ok(Some(
                serde_json::from_str(&content).map_err(ProxyError::Decode)?,
            )),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ckb_types::core::TransactionBuilder;

    fn sample_tx() -> (Value, H256) {
        let tx = TransactionBuilder::default()
            .output(packed::CellOutput::default())
            .output_data(ckb_types::bytes::Bytes::from_static(b"hello").pack())
            .build();
        let json = serde_json::to_value(ckb_jsonrpc_types::Transaction::from(tx.data())).unwrap();
        (json, tx.hash().unpack())
    }

    #[test]
    fn test_record_once_by_computed_hash() {
        let dir = tempfile::tempdir().unwrap();
        let store = TransactionStore::new(dir.path().join("transactions"));
        let (tx, hash) = sample_tx();

        assert_eq!(store.record(&tx).unwrap(), Recorded::New(hash.clone()));
        assert_eq!(store.record(&tx).unwrap(), Recorded::Existing(hash.clone()));
        assert_eq!(fs::read_dir(store.dir()).unwrap().count(), 1);
        assert_eq!(store.load(&hash).unwrap(), Some(tx));
        assert!(store.path(&hash).to_string_lossy().ends_with(&format!("{:#x}.json", hash)));
    }

    #[test]
    fn test_invalid_transaction_is_not_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let store = TransactionStore::new(dir.path());
        assert!(matches!(
            store.record(&serde_json::json!({"version": "nope"})),
            Err(ProxyError::Decode(_))
        ));
        assert_eq!(fs::read_dir(store.dir()).unwrap().count(), 0);
    }

    #[test]
    fn test_recorded_file_keeps_submitted_key_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = TransactionStore::new(dir.path());
        let (tx, hash) = sample_tx();
        // same transaction, keys in reverse order
        let mut reordered = serde_json::Map::new();
        for key in ["witnesses", "outputs_data", "outputs", "inputs", "header_deps", "cell_deps", "version"] {
            reordered.insert(key.to_string(), tx[key].clone());
        }
        let reordered = Value::Object(reordered);
        assert_eq!(store.record(&reordered).unwrap(), Recorded::New(hash.clone()));

        let content = fs::read_to_string(store.path(&hash)).unwrap();
        let witnesses = content.find("\"witnesses\"").unwrap();
        let outputs_data = content.find("\"outputs_data\"").unwrap();
        let version = content.find("\"version\"").unwrap();
        assert!(witnesses < outputs_data && outputs_data < version);
    }
}
