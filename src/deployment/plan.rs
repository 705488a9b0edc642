use super::recipe::{CellRecipe, DepGroupRecipe, DeploymentRecipe};
use ckb_types::H256;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

pub const ONE_CKB: u64 = 1_0000_0000;

#[derive(Default, Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct HumanCapacity(pub u64);

impl From<u64> for HumanCapacity {
    fn from(value: u64) -> HumanCapacity {
        HumanCapacity(value)
    }
}

impl FromStr for HumanCapacity {
    type Err = String;

    /// Parse CKB with up to 8 decimals, e.g. `100`, `61.5` or `1.0 (CKB)`.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let parts = input
            .trim_end_matches("(CKB)")
            .trim()
            .split('.')
            .collect::<Vec<_>>();
        if parts.len() > 2 {
            return Err(format!("invalid capacity: {}", input));
        }
        let ckb = parts[0].parse::<u64>().map_err(|err| err.to_string())?;
        let mut capacity = ckb
            .checked_mul(ONE_CKB)
            .ok_or_else(|| format!("capacity too large: {}", input))?;
        if let Some(shannon_str) = parts.get(1) {
            if shannon_str.len() > 8 {
                return Err(format!(
                    "decimal part too long: {} {}",
                    shannon_str.len(),
                    shannon_str
                ));
            }
            let mut shannon = shannon_str.parse::<u64>().map_err(|err| err.to_string())?;
            for _ in 0..(8 - shannon_str.len()) {
                shannon *= 10;
            }
            capacity = capacity
                .checked_add(shannon)
                .ok_or_else(|| format!("capacity too large: {}", input))?;
        }
        Ok(HumanCapacity(capacity))
    }
}

impl fmt::Display for HumanCapacity {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        let ckb_part = self.0 / ONE_CKB;
        let shannon_part = self.0 % ONE_CKB;
        let shannon_part_string = format!("{:0>8}", shannon_part);
        let mut base = 10;
        let mut suffix_zero = 7;
        for i in 0..8 {
            if shannon_part % base > 0 {
                suffix_zero = i;
                break;
            }
            base *= 10;
        }
        let fraction = &shannon_part_string[..(8 - suffix_zero)];
        if f.alternate() {
            write!(f, "{}.{} (CKB)", ckb_part, fraction)
        } else {
            write!(f, "{}.{}", ckb_part, fraction)
        }
    }
}

/// Summary printed after a deploy run.
#[derive(Serialize)]
pub struct Plan {
    network: String,
    total_occupied_capacity: String,
    deployed: Vec<RecipePlan>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RecipePlan {
    pub cells: Vec<CellPlan>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dep_groups: Vec<DepGroupPlan>,
}

#[derive(Clone, Debug, Serialize)]
pub struct CellPlan {
    pub name: String,
    pub index: u32,
    pub tx_hash: H256,
    pub occupied_capacity: String,
    pub data_hash: H256,
    pub type_id: Option<H256>,
}

#[derive(Clone, Debug, Serialize)]
pub struct DepGroupPlan {
    pub name: String,
    pub tx_hash: H256,
    pub index: u32,
    pub occupied_capacity: String,
}

impl From<&DeploymentRecipe> for RecipePlan {
    fn from(recipe: &DeploymentRecipe) -> Self {
        RecipePlan {
            cells: recipe.cell_recipes.iter().map(Into::into).collect(),
            dep_groups: recipe.dep_group_recipes.iter().map(Into::into).collect(),
        }
    }
}

impl From<&CellRecipe> for CellPlan {
    fn from(recipe: &CellRecipe) -> Self {
        CellPlan {
            name: recipe.name.clone(),
            index: recipe.index.value(),
            data_hash: recipe.data_hash.clone(),
            occupied_capacity: format!(
                "{:#}",
                HumanCapacity::from(recipe.occupied_capacity.value())
            ),
            tx_hash: recipe.tx_hash.clone(),
            type_id: recipe.type_id.clone(),
        }
    }
}

impl From<&DepGroupRecipe> for DepGroupPlan {
    fn from(recipe: &DepGroupRecipe) -> Self {
        DepGroupPlan {
            name: recipe.name.clone(),
            index: recipe.index.value(),
            occupied_capacity: format!(
                "{:#}",
                HumanCapacity::from(recipe.occupied_capacity.value())
            ),
            tx_hash: recipe.tx_hash.clone(),
        }
    }
}

impl Plan {
    pub fn new(network: &str, recipes: &[DeploymentRecipe]) -> Self {
        let total: u64 = recipes
            .iter()
            .flat_map(|recipe| recipe.cell_recipes.iter())
            .map(|cell| cell.occupied_capacity.value())
            .sum();
        Plan {
            network: network.to_string(),
            total_occupied_capacity: format!("{:#}", HumanCapacity::from(total)),
            deployed: recipes.iter().map(Into::into).collect(),
        }
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}
