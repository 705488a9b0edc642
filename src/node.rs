//! Local node management: devnet `ckb` processes and the recording proxy.

use crate::checker::{Checker, Version};
use crate::network::Network;
use crate::proxy::{is_port_listening, RpcProxy, RunningProxy, TransactionStore};
use crate::settings::{Settings, CKB_CONFIG_FILE};
use crate::util;
use anyhow::{anyhow, bail, Context as _, Result};
use log::{debug, info, warn};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};

/// Block assembler lock arg of the devnet miner.
pub const DEVNET_MINER_LOCK_ARG: &str = "0xc8328aabcd9b9e8e64fbc566c4385c3bdeb219d7";
const MINER_START_DELAY: Duration = Duration::from_secs(3);
const CKB_MINER_CONFIG_FILE: &str = "ckb-miner.toml";
const DATA_DIR: &str = "data";

/// Create the devnet config unless it exists, from the configured template
/// or with `ckb init`.
pub async fn init_devnet_if_needed(settings: &Settings, ckb: &Path) -> Result<()> {
    let config_path = &settings.devnet.config_path;
    if config_path.join(CKB_CONFIG_FILE).exists() {
        debug!("devnet config found in {}", config_path.display());
        return Ok(());
    }
    if let Some(template) = &settings.devnet.template_path {
        return init_from_template(settings, template);
    }
    warn!("No devnet template configured, the genesis only holds the built-in system scripts");
    fs::create_dir_all(config_path)?;
    info!("Init devnet config in {}", config_path.display());
    let status = Command::new(ckb)
        .arg("init")
        .arg("--chain")
        .arg("dev")
        .arg("-C")
        .arg(config_path)
        .arg("--ba-arg")
        .arg(DEVNET_MINER_LOCK_ARG)
        .arg("--ba-message")
        .arg("0x")
        .status()
        .await
        .with_context(|| format!("failed to run {}", ckb.display()))?;
    if !status.success() {
        bail!("ckb init exit with code {:?}", status.code());
    }
    Ok(())
}

/// Copy `template` without its chain data and point the miner at the devnet RPC.
fn init_from_template(settings: &Settings, template: &Path) -> Result<()> {
    let config_path = &settings.devnet.config_path;
    if !template.join(CKB_CONFIG_FILE).is_file() {
        bail!(
            "devnet template {} has no {}",
            template.display(),
            CKB_CONFIG_FILE
        );
    }
    info!(
        "Init devnet config in {} from {}",
        config_path.display(),
        template.display()
    );
    util::copy_dir_excluding(template, config_path, &[DATA_DIR])
        .with_context(|| format!("copy devnet template {}", template.display()))?;
    let miner_config = config_path.join(CKB_MINER_CONFIG_FILE);
    if miner_config.is_file() {
        let content = fs::read_to_string(&miner_config)?;
        let content = point_miner_at(&content, &settings.devnet.network.rpc_url)
            .with_context(|| format!("update {}", miner_config.display()))?;
        fs::write(&miner_config, content)?;
    }
    Ok(())
}

/// Set `miner.client.rpc_url` of a `ckb-miner.toml`.
fn point_miner_at(content: &str, rpc_url: &str) -> Result<String> {
    let mut config: toml::Table = content.parse()?;
    let client = config
        .get_mut("miner")
        .and_then(|miner| miner.get_mut("client"))
        .and_then(toml::Value::as_table_mut)
        .ok_or_else(|| anyhow!("[miner.client] not found"))?;
    client.insert(
        "rpc_url".to_string(),
        toml::Value::String(rpc_url.to_string()),
    );
    Ok(toml::to_string_pretty(&config)?)
}

fn spawn_ckb(ckb: &Path, subcommand: &str, config_path: &Path) -> Result<Child> {
    let child = Command::new(ckb)
        .arg(subcommand)
        .arg("-C")
        .arg(config_path)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to run {} {}", ckb.display(), subcommand))?;
    Ok(child)
}

/// Start the recording proxy of `network` in front of `upstream`.
pub async fn start_proxy(
    settings: &Settings,
    network: Network,
    upstream: &str,
    port: u16,
) -> Result<RunningProxy> {
    let store = TransactionStore::new(&settings.network(network).transactions_path);
    let proxy = RpcProxy::with_client(upstream, network, store, settings.http_client()?);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    Ok(proxy.start(addr).await?)
}

async fn stop_proxy(proxy: RunningProxy) {
    if let Err(err) = proxy.stop().await {
        warn!("stop rpc proxy: {}", err);
    }
}

/// Run the proxy until Ctrl-C.
pub async fn run_proxy(
    settings: &Settings,
    network: Network,
    upstream: &str,
    port: u16,
) -> Result<()> {
    let proxy = start_proxy(settings, network, upstream, port).await?;
    println!(
        "{} RPC proxy: http://{} -> {}",
        network,
        proxy.local_addr(),
        upstream
    );
    tokio::signal::ctrl_c().await?;
    println!("Exiting...");
    stop_proxy(proxy).await;
    Ok(())
}

/// Devnet runs `ckb` with a miner behind the proxy, other networks only get
/// the proxy in front of their public RPC.
pub async fn start_node(settings: &Settings, network: Network) -> Result<()> {
    let network_settings = settings.network(network);
    if network != Network::Devnet {
        return run_proxy(
            settings,
            network,
            &network_settings.rpc_url,
            network_settings.rpc_proxy_port,
        )
        .await;
    }

    let ckb = settings.ckb_binary();
    let debugger_version: Version = settings.tools.ckb_debugger.min_version.parse()?;
    Checker::build(&ckb, debugger_version).check_ckb()?;
    init_devnet_if_needed(settings, &ckb).await?;
    let config_path = &settings.devnet.config_path;

    info!("Launching CKB devnet node...");
    let mut node = spawn_ckb(&ckb, "run", config_path)?;
    tokio::select! {
        status = node.wait() => {
            let status = status?;
            return Err(anyhow!("ckb exited early with code {:?}", status.code()));
        }
        _ = tokio::time::sleep(MINER_START_DELAY) => {}
    }
    let mut miner = spawn_ckb(&ckb, "miner", config_path)?;
    let proxy = start_proxy(
        settings,
        network,
        &network_settings.rpc_url,
        network_settings.rpc_proxy_port,
    )
    .await?;
    println!(
        "devnet RPC: {}, proxy: http://{}",
        network_settings.rpc_url,
        proxy.local_addr()
    );

    let result: Result<()> = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            println!("Exiting...");
            signal.map_err(Into::into)
        }
        status = node.wait() => match status {
            Ok(status) => Err(anyhow!("ckb exited with code {:?}", status.code())),
            Err(err) => Err(err.into()),
        },
        status = miner.wait() => match status {
            Ok(status) => Err(anyhow!("ckb miner exited with code {:?}", status.code())),
            Err(err) => Err(err.into()),
        },
    };
    for child in [&mut miner, &mut node] {
        if let Err(err) = child.kill().await {
            debug!("kill child: {}", err);
        }
    }
    stop_proxy(proxy).await;
    result
}

/// Whether the proxy of `network` is accepting connections.
pub async fn status(settings: &Settings, network: Network) -> bool {
    let port = settings.network(network).rpc_proxy_port;
    let listening = is_port_listening(port).await;
    if listening {
        println!(
            "{} RPC proxy is listening on {}",
            network,
            settings.proxy_rpc_url(network)
        );
    } else {
        println!(
            "RPC port {} is not listening. Please make sure the {} node is running and Proxy RPC is enabled.",
            port, network
        );
    }
    listening
}

/// Remove all devnet data, recorded transactions included.
pub fn clean(settings: &Settings) -> Result<()> {
    let path = &settings.devnet.config_path;
    if !path.exists() {
        println!(
            "Nothing to clean. Devnet data directory {} not found.",
            path.display()
        );
        return Ok(());
    }
    fs::remove_dir_all(path).with_context(|| {
        format!(
            "failed to remove {}, did you stop running the chain first?",
            path.display()
        )
    })?;
    println!("Chain data cleaned.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::with_data_dir(dir.path());
        clean(&settings).unwrap();
        fs::create_dir_all(&settings.devnet.data_path).unwrap();
        fs::write(settings.devnet.config_path.join(CKB_CONFIG_FILE), "").unwrap();
        clean(&settings).unwrap();
        assert!(!settings.devnet.config_path.exists());
    }

    #[tokio::test]
    async fn test_init_devnet_from_template() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("template");
        fs::create_dir_all(template.join("specs")).unwrap();
        fs::create_dir_all(template.join(DATA_DIR).join("db")).unwrap();
        fs::write(template.join(CKB_CONFIG_FILE), "[chain]\nspec = { file = \"specs/dev.toml\" }\n").unwrap();
        fs::write(template.join("specs/dev.toml"), "name = \"offckb\"\n").unwrap();
        fs::write(
            template.join(CKB_MINER_CONFIG_FILE),
            "[miner.client]\nrpc_url = \"http://ckb:8114/\"\nblock_on_submit = true\n",
        )
        .unwrap();

        let mut settings = Settings::with_data_dir(&dir.path().join("offckb"));
        settings.devnet.template_path = Some(template);
        // the template path never runs ckb
        init_devnet_if_needed(&settings, Path::new("/nonexistent/ckb"))
            .await
            .unwrap();

        let config_path = &settings.devnet.config_path;
        assert!(config_path.join("specs/dev.toml").is_file());
        assert!(!config_path.join(DATA_DIR).exists());
        let miner: toml::Table =
            fs::read_to_string(config_path.join(CKB_MINER_CONFIG_FILE))
                .unwrap()
                .parse()
                .unwrap();
        assert_eq!(
            miner["miner"]["client"]["rpc_url"].as_str(),
            Some(settings.devnet.network.rpc_url.as_str())
        );
        assert_eq!(miner["miner"]["client"]["block_on_submit"].as_bool(), Some(true));
    }

    #[tokio::test]
    async fn test_existing_devnet_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::with_data_dir(dir.path());
        settings.devnet.template_path = Some(dir.path().join("missing-template"));
        fs::create_dir_all(&settings.devnet.config_path).unwrap();
        fs::write(settings.devnet.config_path.join(CKB_CONFIG_FILE), "").unwrap();
        init_devnet_if_needed(&settings, Path::new("/nonexistent/ckb"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_proxy_status() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::with_data_dir(dir.path());
        let proxy = start_proxy(&settings, Network::Testnet, "http://127.0.0.1:1", 0)
            .await
            .unwrap();
        settings.testnet.rpc_proxy_port = proxy.local_addr().port();
        assert!(status(&settings, Network::Testnet).await);
        proxy.stop().await.unwrap();
        assert!(!status(&settings, Network::Testnet).await);
    }
}
