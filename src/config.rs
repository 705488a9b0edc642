//! `deployment.toml`, the options a contract was last deployed with.
//!
//! ```toml
//! [[cells]]
//! name = "hello"
//! enable_type_id = true
//! location = { file = "build/release/hello" }
//!
//! [lock]
//! code_hash = "0x9bd7e06f3ecf4be0f2fcd2188b23f1b9fcc88e5d4b65a8637b17723bbda3cce8"
//! args = "0xc8328aabcd9b9e8e64fbc566c4385c3bdeb219d7"
//! hash_type = "type"
//! ```

use ckb_jsonrpc_types::Script;
use ckb_types::H256;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEPLOYMENT_FILE: &str = "deployment.toml";

#[derive(Clone, Default, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Deployment {
    pub cells: Vec<Cell>,
    #[serde(default)]
    pub dep_groups: Vec<DepGroup>,
    pub lock: Script,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellLocation {
    OutPoint { tx_hash: H256, index: u32 },
    File { file: String },
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Cell {
    pub name: String,
    pub enable_type_id: bool,
    pub location: CellLocation,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct DepGroup {
    pub name: String,
    pub cells: Vec<String>,
}

/// How one contract binary is deployed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeploymentOptions {
    pub name: String,
    pub binary: PathBuf,
    pub enable_type_id: bool,
    pub lock: Script,
}

impl DeploymentOptions {
    pub fn new(binary: &Path, enable_type_id: bool, lock: Script) -> Self {
        let name = binary
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        DeploymentOptions {
            name,
            binary: binary.to_path_buf(),
            enable_type_id,
            lock,
        }
    }
}

impl From<&DeploymentOptions> for Deployment {
    fn from(options: &DeploymentOptions) -> Self {
        Deployment {
            cells: vec![Cell {
                name: options.name.clone(),
                enable_type_id: options.enable_type_id,
                location: CellLocation::File {
                    file: options.binary.to_string_lossy().into_owned(),
                },
            }],
            dep_groups: Vec::new(),
            lock: options.lock.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ckb_jsonrpc_types::{JsonBytes, ScriptHashType};

    #[test]
    fn test_deployment_toml_layout() {
        let lock = Script {
            code_hash: H256([9u8; 32]),
            hash_type: ScriptHashType::Type,
            args: JsonBytes::from_vec(vec![1, 2, 3]),
        };
        let options = DeploymentOptions::new(Path::new("build/release/hello"), true, lock);
        assert_eq!(options.name, "hello");

        let deployment = Deployment::from(&options);
        let content = toml::to_string_pretty(&deployment).unwrap();
        assert!(content.contains("name = \"hello\""));
        assert!(content.contains("enable_type_id = true"));
        assert!(content.contains("build/release/hello"));
        let parsed: Deployment = toml::from_str(&content).unwrap();
        assert_eq!(parsed, deployment);
    }

    #[test]
    fn test_out_point_location() {
        let cell: Cell = toml::from_str(
            "name = \"secp\"\nenable_type_id = false\n[location]\ntx_hash = \"0x0000000000000000000000000000000000000000000000000000000000000001\"\nindex = 2\n",
        )
        .unwrap();
        assert!(matches!(cell.location, CellLocation::OutPoint { index: 2, .. }));
    }
}
