//! Append-only deployment history.
//!
//! Layout under the artifacts directory:
//!
//! ```text
//! <artifacts>/<network>/<contract>/deployment.toml
//! <artifacts>/<network>/<contract>/migrations/2024-05-01-083000.json
//! ```
//!
//! File names sort chronologically, the greatest one is the current recipe.

use super::recipe::DeploymentRecipe;
use crate::config::{Deployment, DeploymentOptions, DEPLOYMENT_FILE};
use crate::network::Network;
use crate::util;
use chrono::{DateTime, Utc};
use log::debug;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use thiserror::Error;

const MIGRATIONS_DIR: &str = "migrations";
const MIGRATION_TIME_FORMAT: &str = "%Y-%m-%d-%H%M%S";
const MAX_SAME_SECOND: u32 = 999;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no migration of {contract} on {network}")]
    NoMigration { contract: String, network: Network },
    #[error("corrupt migration file {}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("{}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("serialize deployment.toml: {0}")]
    Toml(#[from] toml::ser::Error),
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone)]
pub struct MigrationStore {
    root: PathBuf,
}

impl MigrationStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        MigrationStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn network_dir(&self, network: Network) -> PathBuf {
        self.root.join(network.as_str())
    }

    pub fn contract_dir(&self, contract: &str, network: Network) -> PathBuf {
        self.network_dir(network).join(contract)
    }

    pub fn migrations_dir(&self, contract: &str, network: Network) -> PathBuf {
        self.contract_dir(contract, network).join(MIGRATIONS_DIR)
    }

    /// Record `recipe` as the newest migration of `options.name` and refresh
    /// its `deployment.toml`. Returns the migration file path.
    pub fn write(
        &self,
        recipe: &DeploymentRecipe,
        options: &DeploymentOptions,
        network: Network,
    ) -> Result<PathBuf, StoreError> {
        self.write_at(recipe, options, network, Utc::now())
    }

    pub fn write_at(
        &self,
        recipe: &DeploymentRecipe,
        options: &DeploymentOptions,
        network: Network,
        now: DateTime<Utc>,
    ) -> Result<PathBuf, StoreError> {
        let dir = self.migrations_dir(&options.name, network);
        fs::create_dir_all(&dir).map_err(io_error(&dir))?;
        let content = serde_json::to_string_pretty(recipe).map_err(|source| {
            StoreError::Corrupt {
                path: dir.clone(),
                source,
            }
        })?;
        let stamp = now.format(MIGRATION_TIME_FORMAT).to_string();
        let path = create_unique(&dir, &stamp, content.as_bytes())?;
        debug!("write migration {}", path.display());

        let deployment = Deployment::from(options);
        let toml_path = self
            .contract_dir(&options.name, network)
            .join(DEPLOYMENT_FILE);
        let toml_content = toml::to_string_pretty(&deployment)?;
        fs::write(&toml_path, toml_content).map_err(io_error(&toml_path))?;
        Ok(path)
    }

    /// The newest migration of `contract`, or `None` if it was never deployed.
    pub fn find(
        &self,
        contract: &str,
        network: Network,
    ) -> Result<Option<DeploymentRecipe>, StoreError> {
        let path = match self.newest_file(contract, network)? {
            Some(path) => path,
            None => return Ok(None),
        };
        let content = fs::read_to_string(&path).map_err(io_error(&path))?;
        let recipe = serde_json::from_str(&content)
            .map_err(|source| StoreError::Corrupt { path, source })?;
        Ok(Some(recipe))
    }

    pub fn read_newest(
        &self,
        contract: &str,
        network: Network,
    ) -> Result<DeploymentRecipe, StoreError> {
        self.find(contract, network)?
            .ok_or_else(|| StoreError::NoMigration {
                contract: contract.to_string(),
                network,
            })
    }

    pub fn newest_file(
        &self,
        contract: &str,
        network: Network,
    ) -> Result<Option<PathBuf>, StoreError> {
        Ok(self
            .migration_files(contract, network)?
            .into_iter()
            .last())
    }

    /// All `*.json` migrations of `contract`, oldest first.
    pub fn migration_files(
        &self,
        contract: &str,
        network: Network,
    ) -> Result<Vec<PathBuf>, StoreError> {
        let dir = self.migrations_dir(contract, network);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_error(&dir)(err)),
        };
        let mut files = Vec::new();
        for entry in entries {
            let path = entry.map_err(io_error(&dir))?.path();
            if path.is_file() && path.extension().map_or(false, |ext| ext == "json") {
                files.push(path);
            }
        }
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(files)
    }

    /// Names of contracts with a directory under `network`.
    pub fn contracts(&self, network: Network) -> Result<Vec<String>, StoreError> {
        let dir = self.network_dir(network);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_error(&dir)(err)),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(io_error(&dir))?;
            if entry.path().is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Create `<stamp>.json`, or `<stamp>_001.json` and so on when a migration of
/// the same second exists. `_` sorts after `.`, so later files stay newer.
fn create_unique(dir: &Path, stamp: &str, content: &[u8]) -> Result<PathBuf, StoreError> {
    let candidates = (0..=MAX_SAME_SECOND).map(|n| {
        if n == 0 {
            dir.join(format!("{}.json", stamp))
        } else {
            dir.join(format!("{}_{:03}.json", stamp, n))
        }
    });
    let first = dir.join(format!("{}.json", stamp));
    match util::persist_new(dir, content, candidates) {
        Ok(Some(path)) => Ok(path),
        Ok(None) => Err(StoreError::Io {
            path: first,
            source: io::Error::new(ErrorKind::AlreadyExists, "too many migrations in one second"),
        }),
        Err(source) => Err(StoreError::Io { path: first, source }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::DeploymentResult;
    use chrono::TimeZone;
    use ckb_jsonrpc_types::{JsonBytes, Script, ScriptHashType};
    use ckb_types::H256;

    fn lock() -> Script {
        Script {
            code_hash: H256::default(),
            hash_type: ScriptHashType::Type,
            args: JsonBytes::default(),
        }
    }

    fn recipe(tx: u8, type_id: Option<H256>) -> DeploymentRecipe {
        let result = DeploymentResult {
            tx_hash: H256([tx; 32]),
            index: 0,
            data_hash: H256([7u8; 32]),
            type_id,
            lock: lock(),
        };
        DeploymentRecipe::from_result("hello", 10, &result)
    }

    #[test]
    fn test_file_name_and_newest() {
        let dir = tempfile::tempdir().unwrap();
        let store = MigrationStore::new(dir.path());
        let options = DeploymentOptions::new(Path::new("bin/hello"), false, lock());
        let t1 = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 6).unwrap();

        let first = store
            .write_at(&recipe(1, None), &options, Network::Devnet, t1)
            .unwrap();
        assert_eq!(first.file_name().unwrap(), "2024-01-02-030405.json");
        store
            .write_at(&recipe(2, None), &options, Network::Devnet, t2)
            .unwrap();

        let newest = store.read_newest("hello", Network::Devnet).unwrap();
        assert_eq!(newest.cell_recipes[0].tx_hash, H256([2u8; 32]));
        // reading twice gives the same answer
        assert_eq!(store.read_newest("hello", Network::Devnet).unwrap(), newest);
        assert!(store
            .contract_dir("hello", Network::Devnet)
            .join(DEPLOYMENT_FILE)
            .exists());
    }

    #[test]
    fn test_same_second_gets_suffix_and_stays_newest() {
        let dir = tempfile::tempdir().unwrap();
        let store = MigrationStore::new(dir.path());
        let options = DeploymentOptions::new(Path::new("hello"), true, lock());
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

        store
            .write_at(&recipe(1, None), &options, Network::Testnet, now)
            .unwrap();
        let second = store
            .write_at(&recipe(2, None), &options, Network::Testnet, now)
            .unwrap();
        assert_eq!(second.file_name().unwrap(), "2024-06-01-000000_001.json");
        let newest = store.read_newest("hello", Network::Testnet).unwrap();
        assert_eq!(newest.cell_recipes[0].tx_hash, H256([2u8; 32]));
        assert_eq!(store.migration_files("hello", Network::Testnet).unwrap().len(), 2);
        // nothing but the two migrations, no temporary leftovers
        let entries = fs::read_dir(store.migrations_dir("hello", Network::Testnet)).unwrap();
        assert_eq!(entries.count(), 2);
    }

    #[test]
    fn test_missing_and_corrupt_migrations() {
        let dir = tempfile::tempdir().unwrap();
        let store = MigrationStore::new(dir.path());
        assert!(store.find("hello", Network::Devnet).unwrap().is_none());
        assert!(matches!(
            store.read_newest("hello", Network::Devnet),
            Err(StoreError::NoMigration { .. })
        ));

        let migrations = store.migrations_dir("broken", Network::Devnet);
        fs::create_dir_all(&migrations).unwrap();
        fs::write(migrations.join("2024-01-01-000000.json"), "{not json").unwrap();
        fs::write(migrations.join("notes.txt"), "ignored").unwrap();
        assert!(matches!(
            store.find("broken", Network::Devnet),
            Err(StoreError::Corrupt { .. })
        ));
        assert_eq!(store.contracts(Network::Devnet).unwrap(), vec!["broken"]);
    }
}
