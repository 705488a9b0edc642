//! Scripts that come with each chain.
//!
//! Devnet scripts are read from `ckb list-hashes` of the local devnet, the
//! public networks use the well known deployments below.

use super::{CellDepInfo, DepType, HashType, ScriptInfo, SystemScript};
use crate::network::Network;
use crate::settings::Settings;
use anyhow::{anyhow, Result};
use ckb_types::{h256, H256};
use log::{debug, warn};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::process::Command;

pub type SystemScripts = BTreeMap<String, SystemScript>;

pub const SIGHASH_ALL: &str = "secp256k1_blake160_sighash_all";
pub const MULTISIG_ALL: &str = "secp256k1_blake160_multisig_all";
pub const DAO: &str = "dao";
pub const SUDT: &str = "sudt";
pub const XUDT: &str = "xudt";
pub const OMNILOCK: &str = "omnilock";
pub const ANYONE_CAN_PAY: &str = "anyone_can_pay";
pub const ALWAYS_SUCCESS: &str = "always_success";
pub const SPORE: &str = "spore";
pub const SPORE_CLUSTER: &str = "spore_cluster";
pub const SPORE_CLUSTER_AGENT: &str = "spore_cluster_agent";
pub const SPORE_CLUSTER_PROXY: &str = "spore_cluster_proxy";
pub const SPORE_EXTENSION_LUA: &str = "spore_extension_lua";
pub const CKB_JS_VM: &str = "ckb_js_vm";
pub const NOSTR_LOCK: &str = "nostr_lock";
pub const TYPE_ID: &str = "type_id";

const SECP256K1_DATA: &str = "secp256k1_data";

const SIGHASH_CODE_HASH: H256 =
    h256!("0x9bd7e06f3ecf4be0f2fcd2188b23f1b9fcc88e5d4b65a8637b17723bbda3cce8");
const MULTISIG_CODE_HASH: H256 =
    h256!("0x5c5069eb0857efc65e1bca0c07df34c31663b3622fd3876c876320fc9634e2a8");
const DAO_CODE_HASH: H256 =
    h256!("0x82d76d1b75fe2fd9a27dfbaa65a039221a380d76c926f378d3f81cf3e7e13f2e");
pub const TYPE_ID_CODE_HASH: H256 =
    h256!("0x00000000000000000000000000000000000000000000000000545950455f4944");

fn dep(tx_hash: H256, index: u32, dep_type: DepType) -> CellDepInfo {
    CellDepInfo::new(tx_hash, index, dep_type)
}

fn entry(name: &str, code_hash: H256, hash_type: HashType, cell_deps: Vec<CellDepInfo>) -> (String, SystemScript) {
    let script = SystemScript {
        name: name.to_string(),
        file: None,
        script: ScriptInfo {
            code_hash,
            hash_type,
            cell_deps,
        },
    };
    (name.to_string(), script)
}

fn type_id_entry() -> (String, SystemScript) {
    entry(TYPE_ID, TYPE_ID_CODE_HASH, HashType::Type, Vec::new())
}

pub fn testnet_scripts() -> SystemScripts {
    let secp_group = h256!("0xf8de3bb47d055cdf460d93a2a6e1b05f7432f9777c8c474abf4eec1d4aee5d37");
    vec![
        entry(
            SIGHASH_ALL,
            SIGHASH_CODE_HASH,
            HashType::Type,
            vec![dep(secp_group.clone(), 0, DepType::DepGroup)],
        ),
        entry(
            MULTISIG_ALL,
            MULTISIG_CODE_HASH,
            HashType::Type,
            vec![dep(secp_group.clone(), 1, DepType::DepGroup)],
        ),
        entry(
            DAO,
            DAO_CODE_HASH,
            HashType::Type,
            vec![dep(
                h256!("0x8f8c79eb6671709633fe6a46de93c0fedc9c1b8a6527a18d3983879542635c9f"),
                2,
                DepType::Code,
            )],
        ),
        entry(
            SUDT,
            h256!("0xc5e5dcf215925f7ef4dfaf5f4b4f105bc321c02776d6e7d52a1db3fcd9d011a4"),
            HashType::Type,
            vec![dep(
                h256!("0xe12877ebd2c3c364dc46c5c992bcfaf4fee33fa13eebdf82c591fc9825aab769"),
                0,
                DepType::Code,
            )],
        ),
        entry(
            XUDT,
            h256!("0x25c29dc317811a6f6f3985a7a9ebc4838bd388d19d0feeecf0bcd60f6c0975bb"),
            HashType::Type,
            vec![dep(
                h256!("0xbf6fb538763efec2a70a6a3dcb7242787087e1030c4e7d86585bc63a9d337f5f"),
                0,
                DepType::Code,
            )],
        ),
        entry(
            OMNILOCK,
            h256!("0xf329effd1c475a2978453c8600e1eaf0bc2087ee093c3ee64cc96ec6847752cb"),
            HashType::Type,
            vec![
                dep(secp_group.clone(), 0, DepType::DepGroup),
                dep(
                    h256!("0xec18bf0d857c981c3d1f4e17999b9b90c484b303378e94de1a57b0872f5d4602"),
                    0,
                    DepType::Code,
                ),
            ],
        ),
        entry(
            ANYONE_CAN_PAY,
            h256!("0x3419a1c09eb2567f6552ee7a8ecffd64155cffe0f1796e6e61ec088d740c1356"),
            HashType::Type,
            vec![dep(
                h256!("0xec26b0f85ed839ece5f11c4c4e837ec359f5adc4420410f6453b1f6b60fb96a6"),
                0,
                DepType::DepGroup,
            )],
        ),
        entry(
            SPORE,
            h256!("0x685a60219309029d01310311dba953d67029170ca4848a4ff638e57002130a0d"),
            HashType::Data,
            vec![dep(
                h256!("0x5e8d2a517d50fd4bb4d01737a7952a1f1d35c8afc77240695bb569cd7d9d5a1f"),
                0,
                DepType::Code,
            )],
        ),
        entry(
            SPORE_CLUSTER,
            h256!("0x0bbe768b519d8ea7b96d58f1182eb7e6ef96c541fbd9526975077ee09f049058"),
            HashType::Data,
            vec![dep(
                h256!("0xcebb174d6e300e26074aea2f5dbd7f694bb4fe3de52b6dfe205e54f90164510a"),
                0,
                DepType::Code,
            )],
        ),
        entry(
            SPORE_CLUSTER_AGENT,
            h256!("0x923e997654b2697ee3f77052cb884e98f28799a4270fd412c3edb8f3987ca622"),
            HashType::Data,
            vec![dep(
                h256!("0x52210232292d10c51b48e72a2cea60d8f0a08c2680a97a8ee7ca0a39379f0036"),
                0,
                DepType::Code,
            )],
        ),
        entry(
            SPORE_CLUSTER_PROXY,
            h256!("0x4349889bda064adab8f49f7dd8810d217917f7df28e9b2a1df0b74442399670a"),
            HashType::Data,
            vec![dep(
                h256!("0xc5a41d58155b11ecd87a5a49fdcb6e83bd6684d3b72b2f3686f081945461c156"),
                0,
                DepType::Code,
            )],
        ),
        entry(
            SPORE_EXTENSION_LUA,
            h256!("0x5ff1a403458b436ea4b2ceb72f1fa70a6507968493315b646f5302661cb68e57"),
            HashType::Data,
            vec![dep(
                h256!("0x9b2098e5b6f575b2fd34ffd0212bc1c96e1f9e86fcdb146511849c174dfe0d02"),
                0,
                DepType::Code,
            )],
        ),
        entry(
            CKB_JS_VM,
            h256!("0x3e9b6bead927bef62fcb56f0c79f4fbd1b739f32dd222beac10d346f2918bed7"),
            HashType::Type,
            vec![dep(
                h256!("0x9f6558e91efa7580bfe97830d11cd94ca5d614bbf4a10b36f3a5b9d092749353"),
                0,
                DepType::Code,
            )],
        ),
        entry(
            NOSTR_LOCK,
            h256!("0x6ae5ee0cb887b2df5a9a18137315b9bdc55be8d52637b2de0624092d5f0c91d5"),
            HashType::Type,
            vec![dep(
                h256!("0xa2a434dcdbe280b9ed75bb7d6c7d68186a842456aba0fc506657dc5ed7c01d68"),
                0,
                DepType::Code,
            )],
        ),
        type_id_entry(),
    ]
    .into_iter()
    .collect()
}

pub fn mainnet_scripts() -> SystemScripts {
    let secp_group = h256!("0x71a7ba8fc96349fea0ed3a5c47992e3b4084b031a42264a018e0072e8172e46c");
    vec![
        entry(
            SIGHASH_ALL,
            SIGHASH_CODE_HASH,
            HashType::Type,
            vec![dep(secp_group.clone(), 0, DepType::DepGroup)],
        ),
        entry(
            MULTISIG_ALL,
            MULTISIG_CODE_HASH,
            HashType::Type,
            vec![dep(secp_group.clone(), 1, DepType::DepGroup)],
        ),
        entry(
            DAO,
            DAO_CODE_HASH,
            HashType::Type,
            vec![dep(
                h256!("0xe2fb199810d49a4d8beec56718ba2593b665db9d52299a0f9e6e75416d73ff5c"),
                2,
                DepType::Code,
            )],
        ),
        entry(
            SUDT,
            h256!("0x5e7a36a77e68eecc013dfa2fe6a23f3b6c344b04005808694ae6dd45eea4cfd5"),
            HashType::Type,
            vec![dep(
                h256!("0xc7813f6a415144643970c2e88e0bb6ca6a8edc5dd7c1022746f628284a9936d5"),
                0,
                DepType::Code,
            )],
        ),
        entry(
            XUDT,
            h256!("0x50bd8d6680b8b9cf98b73f3c08faf8b2a21914311954118ad6609be6e78a1b95"),
            HashType::Data1,
            vec![dep(
                h256!("0xc07844ce21b38e4b071dd0e1ee3b0e27afd8d7532491327f39b786343f558ab7"),
                0,
                DepType::Code,
            )],
        ),
        entry(
            OMNILOCK,
            h256!("0x9b819793a64463aed77c615d6cb226eea5487ccfc0783043a587254cda2b6f26"),
            HashType::Type,
            vec![
                dep(secp_group.clone(), 0, DepType::DepGroup),
                dep(
                    h256!("0xc76edf469816aa22f416503c38d0b533d2a018e253e379f134c3985b3472c842"),
                    0,
                    DepType::Code,
                ),
            ],
        ),
        entry(
            ANYONE_CAN_PAY,
            h256!("0xd369597ff47f29fbc0d47d2e3775370d1250b85140c670e4718af712983a2354"),
            HashType::Type,
            vec![dep(
                h256!("0x4153a2014952d7cac45f285ce9a7c5c0c0e1b21f2d378b82ac1433cb11c25c4d"),
                0,
                DepType::DepGroup,
            )],
        ),
        entry(
            SPORE,
            h256!("0x4a4dce1df3dffff7f8b2cd7dff7303df3b6150c9788cb75dcf6747247132b9f5"),
            HashType::Data,
            vec![dep(
                h256!("0x96b198fb5ddbd1eed57ed667068f1f1e55d07907b4c0dbd38675a69ea1b69824"),
                0,
                DepType::Code,
            )],
        ),
        entry(
            SPORE_CLUSTER,
            h256!("0x7366a61534fa7c7e6225ecc0d828ea3b5366adec2b58206f2ee84995fe030075"),
            HashType::Data,
            vec![dep(
                h256!("0xe464b7fb9311c5e2820e61c99afc615d6b98bdefbe318c34868c010cbd0dc938"),
                0,
                DepType::Code,
            )],
        ),
        entry(
            NOSTR_LOCK,
            h256!("0x641a89ad2f77721b803cd50d01351c1f308444072d5fa20088567196c0574c68"),
            HashType::Type,
            vec![dep(
                h256!("0x1911208b136957d5f7c1708a8835edfe8ae1d02700d5cb2c3a6aacf4d5906306"),
                0,
                DepType::Code,
            )],
        ),
        type_id_entry(),
    ]
    .into_iter()
    .collect()
}

/// One chain spec section of `ckb list-hashes`.
#[derive(Debug, Clone, Deserialize)]
pub struct SpecHashes {
    pub system_cells: Vec<SystemCell>,
    #[serde(default)]
    pub dep_groups: Vec<DepGroupCell>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemCell {
    pub path: String,
    pub tx_hash: H256,
    pub index: u32,
    pub data_hash: H256,
    #[serde(default)]
    pub type_hash: Option<H256>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DepGroupCell {
    pub included_cells: Vec<String>,
    pub tx_hash: H256,
    pub index: u32,
}

/// `Bundled(specs/cells/secp256k1_blake160_sighash_all)` -> `secp256k1_blake160_sighash_all`
fn cell_name(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).replace(')', "")
}

/// Build the devnet catalogue from the TOML printed by `ckb list-hashes`.
pub fn parse_list_hashes(content: &str) -> Result<SystemScripts> {
    let specs: BTreeMap<String, SpecHashes> = toml::from_str(content)?;
    let spec = specs
        .into_values()
        .next()
        .ok_or_else(|| anyhow!("no chain spec found in list-hashes output"))?;

    let mut scripts = SystemScripts::new();
    for cell in &spec.system_cells {
        let name = cell_name(&cell.path);
        if name == SECP256K1_DATA {
            continue;
        }
        let cell_dep = match spec
            .dep_groups
            .iter()
            .find(|group| group.included_cells.contains(&cell.path))
        {
            Some(group) => dep(group.tx_hash.clone(), group.index, DepType::DepGroup),
            None => dep(cell.tx_hash.clone(), cell.index, DepType::Code),
        };
        let (code_hash, hash_type) = match &cell.type_hash {
            Some(type_hash) => (type_hash.clone(), HashType::Type),
            None => (cell.data_hash.clone(), HashType::Data2),
        };
        let script = SystemScript {
            name: name.clone(),
            file: Some(cell.path.clone()),
            script: ScriptInfo {
                code_hash,
                hash_type,
                cell_deps: vec![cell_dep],
            },
        };
        scripts.insert(name, script);
    }

    // omnilock verifies sighash signatures too
    let sighash_dep = scripts
        .get(SIGHASH_ALL)
        .and_then(|script| script.script.cell_deps.first().cloned());
    if let (Some(omnilock), Some(sighash_dep)) = (scripts.get_mut(OMNILOCK), sighash_dep) {
        omnilock.script.cell_deps.push(sighash_dep);
    }
    let (name, type_id) = type_id_entry();
    scripts.insert(name, type_id);
    Ok(scripts)
}

/// Run `ckb list-hashes` against the devnet config, `None` when the devnet
/// is not initialised or `ckb` is not available.
pub fn devnet_scripts(settings: &Settings) -> Result<Option<SystemScripts>> {
    let ckb = settings.ckb_binary();
    let output = Command::new(&ckb)
        .arg("list-hashes")
        .arg("-C")
        .arg(&settings.devnet.config_path)
        .output();
    let output = match output {
        Ok(output) if output.status.success() => output,
        Ok(output) => {
            warn!(
                "list-hashes failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Ok(None);
        }
        Err(err) => {
            warn!("can't run {}: {}", ckb.display(), err);
            return Ok(None);
        }
    };
    let content = String::from_utf8_lossy(&output.stdout);
    debug!("list-hashes:\n{}", content);
    parse_list_hashes(&content).map(Some)
}

pub fn system_scripts(network: Network, settings: &Settings) -> Result<Option<SystemScripts>> {
    match network {
        Network::Devnet => devnet_scripts(settings),
        Network::Testnet => Ok(Some(testnet_scripts())),
        Network::Mainnet => Ok(Some(mainnet_scripts())),
    }
}
