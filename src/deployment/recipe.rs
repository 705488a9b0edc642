//! Deployment Recipes

use crate::chain::DeploymentResult;
use ckb_jsonrpc_types::{Uint32, Uint64};
use ckb_types::{core::Capacity, H256};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellRecipe {
    pub name: String,
    pub tx_hash: H256,
    pub index: Uint32,
    pub occupied_capacity: Uint64,
    pub data_hash: H256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_id: Option<H256>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepGroupRecipe {
    pub name: String,
    pub tx_hash: H256,
    pub index: Uint32,
    pub occupied_capacity: Uint64,
}

/// Content of one migration file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecipe {
    pub cell_recipes: Vec<CellRecipe>,
    #[serde(default)]
    pub dep_group_recipes: Vec<DepGroupRecipe>,
}

impl DeploymentRecipe {
    pub fn from_result(name: &str, data_len: usize, result: &DeploymentResult) -> Self {
        let occupied = Capacity::bytes(data_len)
            .map(|capacity| capacity.as_u64())
            .unwrap_or(u64::MAX);
        DeploymentRecipe {
            cell_recipes: vec![CellRecipe {
                name: name.to_string(),
                tx_hash: result.tx_hash.clone(),
                index: result.index.into(),
                occupied_capacity: occupied.into(),
                data_hash: result.data_hash.clone(),
                type_id: result.type_id.clone(),
            }],
            dep_group_recipes: Vec::new(),
        }
    }

    /// The contract cell, multi-cell recipes only describe their first one.
    pub fn primary(&self) -> Option<&CellRecipe> {
        self.cell_recipes.first()
    }
}
