use async_trait::async_trait;
use ckb_types::{bytes::Bytes, H256};
use offckb::chain::{ChainClient, ChainError, DeploymentResult, SignerKey, TxStatus};
use offckb::config::DeploymentOptions;
use offckb::deployment::migration::MigrationStore;
use offckb::deployment::recipe::DeploymentRecipe;
use offckb::deployment::{ArtifactStatus, DeployPath, Deployer};
use offckb::network::Network;
use offckb::scripts::registry::{ScriptRegistry, REGISTRY_FILE};
use offckb::scripts::HashType;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

const DEVNET_KEY: &str = "0xd00c06bfd800d27397002dca6fb0993d5ba6399b4238b2f29ee9deb97593d2bc";

fn hash(n: u64) -> H256 {
    let mut bytes = [0u8; 32];
    bytes[24..].copy_from_slice(&n.to_be_bytes());
    H256(bytes)
}

fn data_hash(data: &[u8]) -> H256 {
    H256(ckb_hash::blake2b_256(data))
}

/// In-memory chain. Every transaction commits unless `commit` is off, type-ids
/// handed out are remembered so upgrades can be checked against them.
struct MockChain {
    store: MigrationStore,
    commit: bool,
    next: AtomicU64,
    type_ids: Mutex<HashSet<H256>>,
    calls: Mutex<Vec<&'static str>>,
}

impl MockChain {
    fn new(store: MigrationStore) -> Self {
        MockChain {
            store,
            commit: true,
            next: AtomicU64::new(1),
            type_ids: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn never_commit(mut self) -> Self {
        self.commit = false;
        self
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn result(
        &self,
        call: &'static str,
        data: &Bytes,
        key: &SignerKey,
        type_id: Option<H256>,
    ) -> DeploymentResult {
        self.calls.lock().unwrap().push(call);
        DeploymentResult {
            tx_hash: hash(self.next.fetch_add(1, Ordering::SeqCst)),
            index: 0,
            data_hash: data_hash(data),
            type_id,
            lock: key.lock_script().into(),
        }
    }
}

#[async_trait]
impl ChainClient for MockChain {
    fn network(&self) -> Network {
        Network::Devnet
    }

    async fn deploy_script(
        &self,
        data: Bytes,
        key: &SignerKey,
    ) -> Result<DeploymentResult, ChainError> {
        Ok(self.result("plain", &data, key, None))
    }

    async fn deploy_new_type_id_script(
        &self,
        data: Bytes,
        key: &SignerKey,
    ) -> Result<DeploymentResult, ChainError> {
        let type_id = hash(1000 + self.next.load(Ordering::SeqCst));
        self.type_ids.lock().unwrap().insert(type_id.clone());
        Ok(self.result("new_type_id", &data, key, Some(type_id)))
    }

    async fn upgrade_type_id_script(
        &self,
        contract: &str,
        data: Bytes,
        key: &SignerKey,
    ) -> Result<DeploymentResult, ChainError> {
        let recorded = self
            .store
            .find(contract, Network::Devnet)?
            .ok_or_else(|| ChainError::MissingMigration {
                contract: contract.to_string(),
                network: Network::Devnet,
            })?
            .primary()
            .and_then(|cell| cell.type_id.clone())
            .ok_or_else(|| ChainError::MissingTypeId(contract.to_string()))?;
        if !self.type_ids.lock().unwrap().contains(&recorded) {
            return Err(ChainError::TypeIdMismatch {
                contract: contract.to_string(),
                recorded,
                actual: "none".to_string(),
            });
        }
        Ok(self.result("upgrade", &data, key, Some(recorded)))
    }

    async fn transaction_status(&self, _tx_hash: &H256) -> Result<TxStatus, ChainError> {
        if self.commit {
            Ok(TxStatus::Committed)
        } else {
            Ok(TxStatus::Pending)
        }
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(10)
    }
}

fn elf(size: usize) -> Vec<u8> {
    let mut content = vec![0x7f, b'E', b'L', b'F', 0xff];
    content.resize(size, 0);
    content
}

fn write_binary(dir: &Path, name: &str, size: usize) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join(name), elf(size)).unwrap();
}

fn migration_count(store: &MigrationStore, contract: &str) -> usize {
    store
        .migration_files(contract, Network::Devnet)
        .map(|files| files.len())
        .unwrap_or(0)
}

fn key() -> SignerKey {
    SignerKey::from_hex(DEVNET_KEY).unwrap()
}

#[tokio::test]
async fn test_oversized_binary_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let bins = dir.path().join("bins");
    write_binary(&bins, "small", 400 * 1024);
    write_binary(&bins, "large", 600 * 1024);
    let store = MigrationStore::new(dir.path().join("deployment"));
    let chain = MockChain::new(store.clone());
    let deployer = Deployer::new(&chain, store.clone(), key());

    let outcome = deployer.deploy_target(&bins, false).await.unwrap();

    assert!(outcome.is_success());
    assert_eq!(outcome.artifacts.len(), 2);
    let small = outcome
        .artifacts
        .iter()
        .find(|outcome| outcome.artifact.name == "small")
        .unwrap();
    assert!(matches!(small.status, ArtifactStatus::Deployed { .. }));
    let large = outcome
        .artifacts
        .iter()
        .find(|outcome| outcome.artifact.name == "large")
        .unwrap();
    match &large.status {
        ArtifactStatus::Skipped(reason) => assert!(reason.contains("too large")),
        status => panic!("unexpected status {:?}", status),
    }
    assert_eq!(chain.calls(), vec!["plain"]);
    assert_eq!(migration_count(&store, "small"), 1);
    assert_eq!(migration_count(&store, "large"), 0);

    let registry = ScriptRegistry::load(&store.root().join(REGISTRY_FILE)).unwrap();
    let small = registry.devnet.get("small").unwrap();
    assert_eq!(small.hash_type, HashType::Data2);
    assert_eq!(small.code_hash, data_hash(&elf(400 * 1024)));
    assert!(!registry.devnet.contains_key("large"));
}

#[tokio::test]
async fn test_type_id_redeploy_upgrades_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let bins = dir.path().join("bins");
    write_binary(&bins, "hello", 1024);
    let store = MigrationStore::new(dir.path().join("deployment"));
    let chain = MockChain::new(store.clone());
    let deployer = Deployer::new(&chain, store.clone(), key());

    assert_eq!(
        deployer.deploy_path("hello", true).unwrap(),
        DeployPath::NewTypeId
    );
    let first = deployer.deploy_target(&bins, true).await.unwrap();
    assert!(first.is_success());
    assert_eq!(
        deployer.deploy_path("hello", true).unwrap(),
        DeployPath::Upgrade
    );
    assert_eq!(
        deployer.deploy_path("hello", false).unwrap(),
        DeployPath::Plain
    );

    // the new binary differs, the type-id must not
    write_binary(&bins, "hello", 2048);
    let second = deployer.deploy_target(&bins, true).await.unwrap();
    assert!(second.is_success());
    assert_eq!(chain.calls(), vec!["new_type_id", "upgrade"]);

    let files = store.migration_files("hello", Network::Devnet).unwrap();
    assert_eq!(files.len(), 2);
    let read = |path: &Path| -> DeploymentRecipe {
        serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    };
    let older = read(&files[0]);
    let newer = read(&files[1]);
    let (older, newer) = (older.primary().unwrap(), newer.primary().unwrap());
    assert!(older.type_id.is_some());
    assert_eq!(older.type_id, newer.type_id);
    assert_ne!(older.tx_hash, newer.tx_hash);
    assert_eq!(newer.occupied_capacity.value(), 2048 * 100_000_000);

    let registry = ScriptRegistry::load(&store.root().join(REGISTRY_FILE)).unwrap();
    let hello = registry.devnet.get("hello").unwrap();
    assert_eq!(hello.hash_type, HashType::Type);
    assert_eq!(Some(&hello.code_hash), newer.type_id.as_ref());
    assert_eq!(hello.cell_deps[0].cell_dep.out_point.tx_hash, newer.tx_hash);
}

#[tokio::test]
async fn test_type_id_mismatch_stops_deployment() {
    let dir = tempfile::tempdir().unwrap();
    let bins = dir.path().join("bins");
    write_binary(&bins, "hello", 1024);
    let store = MigrationStore::new(dir.path().join("deployment"));

    // a migration whose type-id the chain never handed out
    let key = key();
    let forged = DeploymentResult {
        tx_hash: hash(77),
        index: 0,
        data_hash: hash(78),
        type_id: Some(hash(79)),
        lock: key.lock_script().into(),
    };
    let options = DeploymentOptions::new(&bins.join("hello"), true, forged.lock.clone());
    store
        .write(
            &DeploymentRecipe::from_result("hello", 1024, &forged),
            &options,
            Network::Devnet,
        )
        .unwrap();

    let chain = MockChain::new(store.clone());
    let deployer = Deployer::new(&chain, store.clone(), key);
    let outcome = deployer.deploy_target(&bins, true).await.unwrap();

    assert!(!outcome.is_success());
    let (artifact, status) = outcome.failure().unwrap();
    assert_eq!(artifact.name, "hello");
    assert!(status.to_string().contains("type id mismatch"));
    assert!(chain.calls().is_empty());
    assert_eq!(migration_count(&store, "hello"), 1);
}

#[tokio::test]
async fn test_confirm_timeout_leaves_state_unknown() {
    let dir = tempfile::tempdir().unwrap();
    let bins = dir.path().join("bins");
    write_binary(&bins, "first", 1024);
    write_binary(&bins, "second", 1024);
    let store = MigrationStore::new(dir.path().join("deployment"));
    let chain = MockChain::new(store.clone()).never_commit();
    let deployer =
        Deployer::new(&chain, store.clone(), key()).with_confirm_timeout(Duration::from_millis(50));

    let outcome = deployer.deploy_target(&bins, false).await.unwrap();

    assert!(!outcome.is_success());
    assert_eq!(chain.calls(), vec!["plain"]);
    match &outcome.artifacts[0].status {
        ArtifactStatus::Unknown { tx_hash, message } => {
            assert_eq!(tx_hash, &hash(1));
            assert!(message.contains("unknown"));
        }
        status => panic!("unexpected status {:?}", status),
    }
    assert!(outcome.artifacts[0]
        .status
        .to_string()
        .contains("verify transaction"));
    assert!(matches!(
        outcome.artifacts[1].status,
        ArtifactStatus::NotAttempted
    ));
    assert_eq!(migration_count(&store, "first"), 0);
    assert_eq!(migration_count(&store, "second"), 0);
}

#[tokio::test]
async fn test_registry_keeps_other_networks() {
    let dir = tempfile::tempdir().unwrap();
    let bins = dir.path().join("bins");
    write_binary(&bins, "hello", 1024);
    let store = MigrationStore::new(dir.path().join("deployment"));
    let registry_path = store.root().join(REGISTRY_FILE);

    let mut registry = ScriptRegistry::default();
    let testnet_script = offckb::scripts::ScriptInfo {
        code_hash: hash(5),
        hash_type: HashType::Type,
        cell_deps: Vec::new(),
    };
    registry
        .testnet
        .insert("remote".to_string(), testnet_script.clone());
    registry.save(&registry_path).unwrap();

    let chain = MockChain::new(store.clone());
    let deployer = Deployer::new(&chain, store.clone(), key());
    assert!(deployer.deploy_target(&bins, false).await.unwrap().is_success());

    let registry = ScriptRegistry::load(&registry_path).unwrap();
    assert_eq!(registry.testnet.get("remote"), Some(&testnet_script));
    assert!(registry.devnet.contains_key("hello"));
    assert!(registry.mainnet.is_empty());
}
