//! Script descriptions shared by the registry, the system scripts catalogue
//! and the exporters.

pub mod export;
pub mod registry;
pub mod system;

use ckb_types::H256;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashType {
    Type,
    Data,
    Data1,
    Data2,
}

impl HashType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashType::Type => "type",
            HashType::Data => "data",
            HashType::Data1 => "data1",
            HashType::Data2 => "data2",
        }
    }
}

impl fmt::Display for HashType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DepType {
    #[serde(rename = "code")]
    Code,
    #[serde(rename = "depGroup")]
    DepGroup,
}

impl DepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepType::Code => "code",
            DepType::DepGroup => "depGroup",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutPointInfo {
    pub tx_hash: H256,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellDep {
    pub out_point: OutPointInfo,
    pub dep_type: DepType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellDepInfo {
    pub cell_dep: CellDep,
}

impl CellDepInfo {
    pub fn new(tx_hash: H256, index: u32, dep_type: DepType) -> Self {
        CellDepInfo {
            cell_dep: CellDep {
                out_point: OutPointInfo { tx_hash, index },
                dep_type,
            },
        }
    }
}

/// How to reference a script from a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptInfo {
    pub code_hash: H256,
    pub hash_type: HashType,
    pub cell_deps: Vec<CellDepInfo>,
}

/// Scripts of one network keyed by name.
pub type NetworkScripts = BTreeMap<String, ScriptInfo>;

/// A script that ships with a chain, with the file it was built from when known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemScript {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub script: ScriptInfo,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_info_json() {
        let info = ScriptInfo {
            code_hash: H256([1u8; 32]),
            hash_type: HashType::Data2,
            cell_deps: vec![CellDepInfo::new(H256([2u8; 32]), 3, DepType::DepGroup)],
        };
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["hashType"], "data2");
        let dep = &value["cellDeps"][0]["cellDep"];
        assert_eq!(dep["depType"], "depGroup");
        assert_eq!(dep["outPoint"]["index"], 3);
        assert_eq!(dep["outPoint"]["txHash"], format!("{:#x}", H256([2u8; 32])));
    }
}
