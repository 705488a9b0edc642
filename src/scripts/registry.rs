//! Scripts deployed by the user, resolved from their newest migrations.

use super::{CellDepInfo, DepType, HashType, NetworkScripts, ScriptInfo};
use crate::deployment::migration::{MigrationStore, StoreError};
use crate::deployment::recipe::DeploymentRecipe;
use crate::network::Network;
use anyhow::{Context as _, Result};
use log::{debug, error};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

pub const REGISTRY_FILE: &str = "scripts.json";

/// `{ devnet: {...}, testnet: {...}, mainnet: {...} }`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptRegistry {
    #[serde(default)]
    pub devnet: NetworkScripts,
    #[serde(default)]
    pub testnet: NetworkScripts,
    #[serde(default)]
    pub mainnet: NetworkScripts,
}

impl ScriptRegistry {
    pub fn network(&self, network: Network) -> &NetworkScripts {
        match network {
            Network::Devnet => &self.devnet,
            Network::Testnet => &self.testnet,
            Network::Mainnet => &self.mainnet,
        }
    }

    pub fn network_mut(&mut self, network: Network) -> &mut NetworkScripts {
        match network {
            Network::Devnet => &mut self.devnet,
            Network::Testnet => &mut self.testnet,
            Network::Mainnet => &mut self.mainnet,
        }
    }

    /// Read `path`, a missing file is an empty registry.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("invalid script registry {}", path.display())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err).with_context(|| format!("read {}", path.display())),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }
}

/// Script reference of a recipe, the type-id hash wins over the data hash.
pub fn script_info_from(recipe: &DeploymentRecipe) -> Option<(String, ScriptInfo)> {
    let cell = recipe.primary()?;
    let (code_hash, hash_type) = match &cell.type_id {
        Some(type_id) => (type_id.clone(), HashType::Type),
        None => (cell.data_hash.clone(), HashType::Data2),
    };
    let cell_deps = if recipe.dep_group_recipes.is_empty() {
        vec![CellDepInfo::new(
            cell.tx_hash.clone(),
            cell.index.value(),
            DepType::Code,
        )]
    } else {
        recipe
            .dep_group_recipes
            .iter()
            .map(|group| {
                CellDepInfo::new(group.tx_hash.clone(), group.index.value(), DepType::DepGroup)
            })
            .collect()
    };
    let info = ScriptInfo {
        code_hash,
        hash_type,
        cell_deps,
    };
    Some((cell.name.clone(), info))
}

/// Scripts of every contract deployed on `network`. A contract whose newest
/// migration can't be read is logged and left out.
pub fn regenerate(store: &MigrationStore, network: Network) -> Result<NetworkScripts> {
    let mut scripts = NetworkScripts::new();
    for contract in store.contracts(network)? {
        match store.find(&contract, network) {
            Ok(Some(recipe)) => match script_info_from(&recipe) {
                Some((name, info)) => {
                    scripts.insert(name, info);
                }
                None => debug!("migration of {} has no cell recipe", contract),
            },
            Ok(None) => debug!("no migration found for {}", contract),
            Err(err @ StoreError::Corrupt { .. }) => {
                error!("skip {}: {}", contract, err);
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(scripts)
}

/// Replace the `network` section of the registry at `path` with `scripts`,
/// other networks are kept as they are.
pub fn persist(path: &Path, network: Network, scripts: NetworkScripts) -> Result<()> {
    let mut registry = ScriptRegistry::load(path)?;
    *registry.network_mut(network) = scripts;
    registry.save(path)
}

/// Regenerate `network` into `<artifacts>/scripts.json`.
pub fn update_network(store: &MigrationStore, network: Network) -> Result<()> {
    let scripts = regenerate(store, network)?;
    persist(&store.root().join(REGISTRY_FILE), network, scripts)
}

pub fn generate_all(store: &MigrationStore) -> Result<ScriptRegistry> {
    let mut registry = ScriptRegistry::default();
    for network in Network::ALL {
        *registry.network_mut(network) = regenerate(store, network)?;
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployment::recipe::{CellRecipe, DepGroupRecipe};
    use ckb_types::H256;

    fn cell(type_id: Option<H256>) -> CellRecipe {
        CellRecipe {
            name: "hello".to_string(),
            tx_hash: H256([1u8; 32]),
            index: 2u32.into(),
            occupied_capacity: 0u64.into(),
            data_hash: H256([2u8; 32]),
            type_id,
        }
    }

    #[test]
    fn test_script_info_prefers_type_id() {
        let recipe = DeploymentRecipe {
            cell_recipes: vec![cell(Some(H256([3u8; 32])))],
            dep_group_recipes: Vec::new(),
        };
        let (name, info) = script_info_from(&recipe).unwrap();
        assert_eq!(name, "hello");
        assert_eq!(info.code_hash, H256([3u8; 32]));
        assert_eq!(info.hash_type, HashType::Type);
        assert_eq!(info.cell_deps.len(), 1);
        assert_eq!(info.cell_deps[0].cell_dep.dep_type, DepType::Code);
        assert_eq!(info.cell_deps[0].cell_dep.out_point.index, 2);

        let recipe = DeploymentRecipe {
            cell_recipes: vec![cell(None)],
            dep_group_recipes: Vec::new(),
        };
        let (_, info) = script_info_from(&recipe).unwrap();
        assert_eq!(info.code_hash, H256([2u8; 32]));
        assert_eq!(info.hash_type, HashType::Data2);
    }

    #[test]
    fn test_dep_group_recipes_become_cell_deps() {
        let recipe = DeploymentRecipe {
            cell_recipes: vec![cell(None)],
            dep_group_recipes: vec![DepGroupRecipe {
                name: "group".to_string(),
                tx_hash: H256([4u8; 32]),
                index: 0u32.into(),
                occupied_capacity: 0u64.into(),
            }],
        };
        let (_, info) = script_info_from(&recipe).unwrap();
        assert_eq!(info.cell_deps.len(), 1);
        assert_eq!(info.cell_deps[0].cell_dep.dep_type, DepType::DepGroup);
        assert_eq!(info.cell_deps[0].cell_dep.out_point.tx_hash, H256([4u8; 32]));
    }

    #[test]
    fn test_persist_keeps_other_networks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(REGISTRY_FILE);
        let (name, info) = script_info_from(&DeploymentRecipe {
            cell_recipes: vec![cell(None)],
            dep_group_recipes: Vec::new(),
        })
        .unwrap();

        let mut testnet = NetworkScripts::new();
        testnet.insert(name.clone(), info.clone());
        persist(&path, Network::Testnet, testnet).unwrap();
        persist(&path, Network::Devnet, NetworkScripts::new()).unwrap();

        let registry = ScriptRegistry::load(&path).unwrap();
        assert!(registry.devnet.is_empty());
        assert_eq!(registry.testnet.get(&name), Some(&info));
        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(raw.get("mainnet").is_some());
    }
}
