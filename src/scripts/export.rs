//! Render system scripts for the consumers that need them.

use super::system::{self, SystemScripts};
use super::{ScriptInfo, SystemScript};
use crate::network::Network;
use anyhow::{anyhow, Error, Result};
use log::warn;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::fmt::Write as _;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportStyle {
    #[default]
    System,
    Lumos,
    Ccc,
}

impl FromStr for ExportStyle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "system" => Ok(ExportStyle::System),
            "lumos" => Ok(ExportStyle::Lumos),
            "ccc" => Ok(ExportStyle::Ccc),
            _ => Err(anyhow!("Unexpected export style '{}'", s)),
        }
    }
}

/// Plain listing with one block per script.
pub fn to_system_text(scripts: &SystemScripts, network: Network) -> Result<String> {
    let mut out = String::new();
    writeln!(
        out,
        "*** CKB {} System Scripts ***\n",
        network.as_str().to_uppercase()
    )?;
    for (name, script) in scripts {
        writeln!(out, "- name: {}", name)?;
        if let Some(file) = &script.file {
            writeln!(out, "  file: {}", file)?;
        }
        writeln!(out, "  code_hash: {:#x}", script.script.code_hash)?;
        writeln!(out, "  hash_type: {}", script.script.hash_type)?;
        writeln!(
            out,
            "  cellDeps: {}\n",
            serde_json::to_string_pretty(&script.script.cell_deps)?
        )?;
    }
    Ok(out)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct LumosScript {
    pub code_hash: String,
    pub hash_type: String,
    pub tx_hash: String,
    pub index: String,
    pub dep_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short_id: Option<u8>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct LumosConfig {
    pub prefix: String,
    pub scripts: Map<String, Value>,
}

fn lumos_script(script: &SystemScript, short_id: Option<u8>) -> Result<LumosScript> {
    let dep = script
        .script
        .cell_deps
        .first()
        .ok_or_else(|| anyhow!("{} has no cell dep", script.name))?;
    Ok(LumosScript {
        code_hash: format!("{:#x}", script.script.code_hash),
        hash_type: script.script.hash_type.to_string(),
        tx_hash: format!("{:#x}", dep.cell_dep.out_point.tx_hash),
        index: format!("{:#x}", dep.cell_dep.out_point.index),
        dep_type: dep.cell_dep.dep_type.as_str().to_string(),
        short_id,
    })
}

/// Look up `name`. A missing script is an error, except on devnet whose
/// genesis may only carry the built-in scripts.
fn lookup<'a>(
    scripts: &'a SystemScripts,
    name: &str,
    network: Network,
) -> Result<Option<&'a SystemScript>> {
    match scripts.get(name) {
        Some(script) => Ok(Some(script)),
        None if network == Network::Devnet => {
            warn!("system script {} not found on devnet, skipped", name);
            Ok(None)
        }
        None => Err(anyhow!("system script {} not found on {}", name, network)),
    }
}

/// Lumos `config.json` layout. The scripts a lumos config can't do without
/// are required, the spore extensions and always-success are optional.
pub fn to_lumos_config(scripts: &SystemScripts, network: Network) -> Result<LumosConfig> {
    let required = [
        ("SECP256K1_BLAKE160", system::SIGHASH_ALL, Some(1)),
        ("SECP256K1_BLAKE160_MULTISIG", system::MULTISIG_ALL, None),
        ("DAO", system::DAO, Some(2)),
        ("SUDT", system::SUDT, None),
        ("XUDT", system::XUDT, None),
        ("OMNILOCK", system::OMNILOCK, None),
        ("ANYONE_CAN_PAY", system::ANYONE_CAN_PAY, None),
        ("SPORE", system::SPORE, None),
        ("SPORE_CLUSTER", system::SPORE_CLUSTER, None),
    ];
    let optional = [
        ("ALWAYS_SUCCESS", system::ALWAYS_SUCCESS),
        ("SPORE_CLUSTER_AGENT", system::SPORE_CLUSTER_AGENT),
        ("SPORE_CLUSTER_PROXY", system::SPORE_CLUSTER_PROXY),
        ("SPORE_LUA", system::SPORE_EXTENSION_LUA),
    ];

    let mut entries = Map::new();
    for (key, name, short_id) in required {
        let script = match lookup(scripts, name, network)? {
            Some(script) => script,
            None => continue,
        };
        entries.insert(
            key.to_string(),
            serde_json::to_value(lumos_script(script, short_id)?)?,
        );
    }
    for (key, name) in optional {
        if let Some(script) = scripts.get(name) {
            entries.insert(key.to_string(), serde_json::to_value(lumos_script(script, None)?)?);
        }
    }
    Ok(LumosConfig {
        prefix: network.address_prefix().to_string(),
        scripts: entries,
    })
}

/// CCC `KnownScript` table.
pub fn to_ccc_known_scripts(scripts: &SystemScripts, network: Network) -> Result<Map<String, Value>> {
    let known = [
        ("Secp256k1Blake160", system::SIGHASH_ALL),
        ("Secp256k1Multisig", system::MULTISIG_ALL),
        ("AnyoneCanPay", system::ANYONE_CAN_PAY),
        ("OmniLock", system::OMNILOCK),
        ("XUdt", system::XUDT),
    ];
    let mut table = Map::new();
    for (key, name) in known {
        let script = match lookup(scripts, name, network)? {
            Some(script) => script,
            None => continue,
        };
        table.insert(key.to_string(), serde_json::to_value(&script.script)?);
    }
    let type_id = ScriptInfo {
        code_hash: system::TYPE_ID_CODE_HASH,
        hash_type: super::HashType::Type,
        cell_deps: Vec::new(),
    };
    table.insert("TypeId".to_string(), serde_json::to_value(type_id)?);
    Ok(table)
}

/// Render `scripts` of `network` in `style`.
pub fn render(scripts: &SystemScripts, network: Network, style: ExportStyle) -> Result<String> {
    let upper = network.as_str().to_uppercase();
    match style {
        ExportStyle::System => to_system_text(scripts, network),
        ExportStyle::Lumos => Ok(format!(
            "*** CKB {} System Scripts As LumosConfig ***\n\n{}",
            upper,
            serde_json::to_string_pretty(&to_lumos_config(scripts, network)?)?
        )),
        ExportStyle::Ccc => Ok(format!(
            "*** CKB {} System Scripts As CCC KnownScripts ***\n\n{}",
            upper,
            serde_json::to_string_pretty(&to_ccc_known_scripts(scripts, network)?)?
        )),
    }
}

/// `{ devnet, testnet, mainnet }` document, devnet is `null` when unavailable.
pub fn all_networks_json(devnet: Option<SystemScripts>) -> Value {
    json!({
        "devnet": devnet,
        "testnet": system::testnet_scripts(),
        "mainnet": system::mainnet_scripts(),
    })
}
