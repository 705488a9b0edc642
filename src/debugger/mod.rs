//! Run transactions recorded by the RPC proxy under `ckb-debugger`.
//!
//! A native `ckb-debugger` is used when a recent enough one is installed,
//! otherwise the debugger runs in docker.

pub mod dumper;
pub mod transaction;

use crate::chain::rpc::RpcClient;
use crate::checker::{Checker, Version, CKB_DEBUGGER_BIN};
use crate::network::Network;
use crate::settings::Settings;
use crate::util::DockerCommand;
use anyhow::{anyhow, bail, Context as _, Result};
use ckb_types::H256;
use log::{error, info, warn};
use regex::Regex;
use std::path::Path;
use std::process::Command;
use transaction::{CellType, ScriptGroupType, ScriptTarget};

lazy_static::lazy_static! {
    static ref SINGLE_SCRIPT: Regex =
        Regex::new(r"(?i)^(input|output)\[(\d+)\]\.(lock|type)$").expect("regex");
}

const CONTAINER_TX_DIR: &str = "/tx";
const CONTAINER_BIN_DIR: &str = "/bin-dir";

pub trait Debugger {
    fn name(&self) -> &'static str;

    /// Debug the mock transaction in `tx_file`. `bin` replaces the script
    /// binary of the selected group.
    fn debug(&self, tx_file: &Path, target: &ScriptTarget, bin: Option<&Path>) -> Result<()>;
}

pub struct NativeDebugger;

impl Debugger for NativeDebugger {
    fn name(&self) -> &'static str {
        "native"
    }

    fn debug(&self, tx_file: &Path, target: &ScriptTarget, bin: Option<&Path>) -> Result<()> {
        let mut cmd = Command::new(CKB_DEBUGGER_BIN);
        cmd.arg("--tx-file").arg(tx_file).args(target.args());
        if let Some(bin) = bin {
            cmd.arg("--bin").arg(bin);
        }
        let status = cmd
            .status()
            .with_context(|| format!("failed to run {}", CKB_DEBUGGER_BIN))?;
        if !status.success() {
            bail!("{} exit with code {:?}", CKB_DEBUGGER_BIN, status.code());
        }
        Ok(())
    }
}

pub struct DockerDebugger {
    docker_image: String,
}

impl DockerDebugger {
    pub fn new(docker_image: String) -> Self {
        DockerDebugger { docker_image }
    }

    fn command(&self, tx_file: &Path, target: &ScriptTarget, bin: Option<&Path>) -> Result<(DockerCommand, Vec<String>)> {
        let (tx_dir, tx_name) = split_file(tx_file)?;
        let mut docker = DockerCommand::new(self.docker_image.clone())
            .map_volume(tx_dir, CONTAINER_TX_DIR.to_string())
            .workdir(CONTAINER_TX_DIR.to_string());
        let mut args = vec![
            CKB_DEBUGGER_BIN.to_string(),
            "--tx-file".to_string(),
            format!("{}/{}", CONTAINER_TX_DIR, tx_name),
        ];
        args.extend(target.args());
        if let Some(bin) = bin {
            let (bin_dir, bin_name) = split_file(bin)?;
            docker = docker.map_volume(bin_dir, CONTAINER_BIN_DIR.to_string());
            args.push("--bin".to_string());
            args.push(format!("{}/{}", CONTAINER_BIN_DIR, bin_name));
        }
        Ok((docker, args))
    }
}

impl Debugger for DockerDebugger {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn debug(&self, tx_file: &Path, target: &ScriptTarget, bin: Option<&Path>) -> Result<()> {
        let (docker, args) = self.command(tx_file, target, bin)?;
        docker.run(&args)
    }
}

fn split_file(path: &Path) -> Result<(&Path, String)> {
    let path_str = path.display();
    let name = path
        .file_name()
        .ok_or_else(|| anyhow!("{} is not a file", path_str))?
        .to_string_lossy()
        .into_owned();
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    Ok((dir, name))
}

/// Native debugger when installed and recent enough, else docker.
pub fn select_debugger(settings: &Settings) -> Result<Box<dyn Debugger>> {
    let debugger_settings = &settings.tools.ckb_debugger;
    let min_version: Version = debugger_settings
        .min_version
        .parse()
        .with_context(|| format!("invalid ckb-debugger min_version {}", debugger_settings.min_version))?;
    if Checker::native_debugger_ready(min_version) {
        info!("Using native {}", CKB_DEBUGGER_BIN);
        return Ok(Box::new(NativeDebugger));
    }
    if Checker::docker_installed() {
        warn!(
            "{} {} or later not found, running {} in docker",
            CKB_DEBUGGER_BIN, min_version, debugger_settings.docker_image
        );
        return Ok(Box::new(DockerDebugger::new(
            debugger_settings.docker_image.clone(),
        )));
    }
    bail!(
        "neither {} {} nor docker is installed, run `offckb check` for details",
        CKB_DEBUGGER_BIN,
        min_version
    )
}

/// Parse `input[0].lock` style script selectors.
pub fn parse_single_script(value: &str) -> Result<ScriptTarget> {
    let caps = SINGLE_SCRIPT.captures(value.trim()).ok_or_else(|| {
        anyhow!(
            "Invalid --single-script value: {}, example format: \"input[0].lock\"",
            value
        )
    })?;
    let cell_type = if caps[1].eq_ignore_ascii_case("input") {
        CellType::Input
    } else {
        CellType::Output
    };
    let cell_index: usize = caps[2].parse()?;
    let script_type = if caps[3].eq_ignore_ascii_case("lock") {
        ScriptGroupType::Lock
    } else {
        ScriptGroupType::Type
    };
    Ok(ScriptTarget::new(cell_type, cell_index, script_type))
}

pub fn parse_tx_hash(value: &str) -> Result<H256> {
    value
        .trim()
        .trim_start_matches("0x")
        .parse::<H256>()
        .map_err(|err| anyhow!("invalid transaction hash {}: {}", value, err))
}

/// Debug a recorded transaction, every script unless `single` selects one.
pub async fn debug_transaction(
    settings: &Settings,
    network: Network,
    tx_hash: &H256,
    single: Option<ScriptTarget>,
    bin: Option<&Path>,
    debugger: &dyn Debugger,
) -> Result<()> {
    let hash = format!("{:#x}", tx_hash);
    let recorded = settings.transaction_file(network, &hash);
    let full_tx_file = settings.full_transaction_file(network, &hash);
    let url = reqwest::Url::parse(&settings.network(network).rpc_url)?;
    let rpc = RpcClient::with_client(url, settings.http_client()?);
    let mock_tx = dumper::dump_transaction(&rpc, &recorded, &full_tx_file).await?;

    let targets = match single {
        Some(target) => vec![target],
        None => mock_tx.script_targets(),
    };
    info!(
        "Debugging {} with the {} debugger",
        full_tx_file.display(),
        debugger.name()
    );
    let mut failed = 0;
    for target in &targets {
        println!("------------------------------");
        println!("{}", target);
        if let Err(err) = debugger.debug(&full_tx_file, target, bin) {
            error!("{}: {}", target, err);
            failed += 1;
        }
    }
    if failed > 0 {
        bail!("{} of {} scripts failed", failed, targets.len());
    }
    Ok(())
}
