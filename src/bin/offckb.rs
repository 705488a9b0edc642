use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::exit;

use anyhow::{anyhow, bail, Context as _, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use log::info;

use offckb::chain::{Address, Amount, CkbRpcClient, SignerKey};
use offckb::checker::{Checker, Version as ToolVersion};
use offckb::debugger;
use offckb::deployment::migration::MigrationStore;
use offckb::deployment::plan::{HumanCapacity, Plan};
use offckb::deployment::Deployer;
use offckb::network::Network;
use offckb::node;
use offckb::project_context::{load_project_context, MY_SCRIPTS_FILE, SYSTEM_SCRIPTS_FILE};
use offckb::scripts::export::{self, ExportStyle};
use offckb::scripts::{registry, system};
use offckb::settings::{ConfigItem, Settings};
use offckb::util::ask_for_confirm;
use offckb::version::Version;
use offckb::wallet;

const DEFAULT_DEPLOYMENT_DIR: &str = "deployment";

fn network_arg() -> Arg {
    Arg::new("network")
        .long("network")
        .help("CKB network")
        .value_parser(["devnet", "testnet", "mainnet"])
        .default_value("devnet")
}

fn privkey_arg(help: &'static str) -> Arg {
    Arg::new("privkey")
        .long("privkey")
        .env("OFFCKB_PRIVKEY")
        .hide_env_values(true)
        .help(help)
}

fn proxy_rpc_arg() -> Arg {
    Arg::new("proxy-rpc")
        .long("proxy-rpc")
        .help("Send transactions through the local RPC proxy")
        .action(ArgAction::SetTrue)
}

fn fee_rate_arg() -> Arg {
    Arg::new("fee-rate")
        .long("fee-rate")
        .help("Fee rate in shannons per KB")
        .value_parser(value_parser!(u64))
        .default_value("1000")
}

fn to_arg() -> Arg {
    Arg::new("to").required(true).help("Receiver address")
}

fn amount_arg() -> Arg {
    Arg::new("amount").required(true).help("Amount in CKB, e.g. 100 or 61.5")
}

fn config_arg() -> Arg {
    Arg::new("config")
        .long("config")
        .help("Project config file, default to ./offckb.toml")
        .value_parser(value_parser!(PathBuf))
}

fn build_cli() -> Command {
    Command::new("offckb")
        .arg_required_else_help(true)
        .version(Version::current().to_string())
        .author("Nervos Developer Tools Team")
        .about("CKB local development network, contract deployment and debugging toolkit")
        .subcommand(
            Command::new("node")
                .about("Run a devnet node with miner and RPC proxy, or a proxy for testnet/mainnet")
                .arg(network_arg())
                .display_order(0),
        )
        .subcommand(
            Command::new("proxy-rpc")
                .about("Start an RPC proxy that records sent transactions")
                .args([
                    Arg::new("ckb-rpc").long("ckb-rpc").help("Upstream CKB RPC url, default to the network RPC"),
                    Arg::new("port")
                        .long("port")
                        .help("Listening port, default to the network proxy port")
                        .value_parser(value_parser!(u16)),
                    network_arg(),
                ])
                .display_order(1),
        )
        .subcommand(
            Command::new("status")
                .about("Check whether the RPC proxy of a network is running")
                .arg(network_arg())
                .display_order(2),
        )
        .subcommand(
            Command::new("clean")
                .about("Remove devnet chain data and recorded transactions")
                .arg(
                    Arg::new("yes")
                        .short('y')
                        .long("yes")
                        .help("Skip confirmation")
                        .action(ArgAction::SetTrue),
                )
                .display_order(3),
        )
        .subcommand(
            Command::new("deploy")
                .about("Deploy contract binaries and record the migrations")
                .args([
                    network_arg(),
                    Arg::new("target")
                        .long("target")
                        .help("Binary file or folder, default to contract_bin_folder of the project")
                        .value_parser(value_parser!(PathBuf)),
                    Arg::new("output")
                        .long("output")
                        .help("Deployment artifacts folder")
                        .value_parser(value_parser!(PathBuf)),
                    Arg::new("type-id")
                        .long("type-id")
                        .help("Deploy with a type-id so that later deployments upgrade in place")
                        .action(ArgAction::SetTrue),
                    privkey_arg("Private key paying for the deployment, required except on devnet"),
                    proxy_rpc_arg(),
                    fee_rate_arg(),
                    config_arg(),
                ])
                .display_order(4),
        )
        .subcommand(
            Command::new("system-scripts")
                .about("Print the system scripts of a network")
                .args([
                    Arg::new("export-style")
                        .long("export-style")
                        .value_parser(["system", "lumos", "ccc"])
                        .default_value("system"),
                    network_arg(),
                    Arg::new("output")
                        .long("output")
                        .help("Write system scripts of all networks to a JSON file")
                        .value_parser(value_parser!(PathBuf)),
                ])
                .display_order(5),
        )
        .subcommand(
            Command::new("sync-scripts")
                .about("Write system and deployed scripts into the project contract_info_folder")
                .arg(config_arg())
                .display_order(6),
        )
        .subcommand(
            Command::new("debug")
                .about("Debug a transaction recorded by the RPC proxy")
                .args([
                    Arg::new("tx-hash").long("tx-hash").required(true).help("Transaction hash"),
                    Arg::new("single-script")
                        .long("single-script")
                        .help("Only debug one script, e.g. input[0].lock"),
                    Arg::new("bin")
                        .long("bin")
                        .requires("single-script")
                        .help("Replace the script binary with a local file")
                        .value_parser(value_parser!(PathBuf)),
                    network_arg(),
                ])
                .display_order(7),
        )
        .subcommand(
            Command::new("config")
                .about("Manage settings")
                .subcommand_required(true)
                .subcommand(Command::new("list").about("Print all settings"))
                .subcommand(
                    Command::new("get")
                        .about("Print a setting")
                        .arg(Arg::new("item").required(true).help("proxy, ckb-version or devnet-template")),
                )
                .subcommand(
                    Command::new("set")
                        .about("Change a setting")
                        .arg(Arg::new("item").required(true).help("proxy, ckb-version or devnet-template"))
                        .arg(Arg::new("value").required(true)),
                )
                .subcommand(
                    Command::new("rm")
                        .about("Reset a setting to its default")
                        .arg(Arg::new("item").required(true).help("proxy, ckb-version or devnet-template")),
                )
                .display_order(8),
        )
        .subcommand(
            Command::new("check")
                .about("Check environment and dependencies")
                .display_order(9),
        )
        .subcommand(
            Command::new("accounts")
                .about("Print the devnet accounts funded by the genesis block")
                .display_order(10),
        )
        .subcommand(
            Command::new("balance")
                .about("Print the capacity of an address")
                .args([Arg::new("address").required(true).help("CKB address"), network_arg()])
                .display_order(11),
        )
        .subcommand(
            Command::new("transfer")
                .about("Transfer CKB to an address")
                .args([
                    to_arg(),
                    amount_arg(),
                    network_arg(),
                    privkey_arg("Sender private key, default to devnet account #0 on devnet"),
                    proxy_rpc_arg(),
                    fee_rate_arg(),
                ])
                .display_order(12),
        )
        .subcommand(
            Command::new("transfer-all")
                .about("Transfer all plain cells of the sender to an address")
                .args([
                    to_arg(),
                    network_arg(),
                    privkey_arg("Sender private key, default to devnet account #0 on devnet"),
                    proxy_rpc_arg(),
                    fee_rate_arg(),
                ])
                .display_order(13),
        )
        .subcommand(
            Command::new("deposit")
                .about("Fund an address from devnet account #0")
                .args([to_arg(), amount_arg(), network_arg(), proxy_rpc_arg(), fee_rate_arg()])
                .display_order(14),
        )
}

fn network_of(args: &ArgMatches) -> Result<Network> {
    args.get_one::<String>("network")
        .map(|network| network.parse())
        .unwrap_or(Ok(Network::Devnet))
}

fn signer_key(network: Network, privkey: Option<&String>) -> Result<SignerKey> {
    let key = match (privkey, network) {
        (Some(privkey), _) => SignerKey::from_hex(privkey)?,
        (None, Network::Devnet) => SignerKey::from_hex(wallet::DEVNET_ACCOUNT_KEYS[0])?,
        (None, network) => bail!("--privkey is required on {}", network),
    };
    Ok(key)
}

/// Client for `network`, through the proxy when `--proxy-rpc` is set.
fn rpc_client(
    settings: &Settings,
    network: Network,
    args: &ArgMatches,
) -> Result<(CkbRpcClient, String)> {
    let proxied = args.try_get_one::<bool>("proxy-rpc").ok().flatten().copied().unwrap_or(false);
    let rpc_url = if proxied {
        settings.proxy_rpc_url(network)
    } else {
        settings.network(network).rpc_url.clone()
    };
    let url = reqwest::Url::parse(&rpc_url).with_context(|| format!("invalid rpc url {}", rpc_url))?;
    let fee_rate = args
        .try_get_one::<u64>("fee-rate")
        .ok()
        .flatten()
        .copied()
        .unwrap_or(1000);
    let client = CkbRpcClient::new(network, url)
        .with_http_client(settings.http_client()?)
        .with_fee_rate(fee_rate);
    Ok((client, rpc_url))
}

fn receiver(network: Network, args: &ArgMatches) -> Result<Address> {
    let to = args
        .get_one::<String>("to")
        .ok_or_else(|| anyhow!("missing receiver address"))?;
    Ok(Address::parse_for(network, to)?)
}

fn amount_of(args: &ArgMatches) -> Result<Amount> {
    let amount = args
        .get_one::<String>("amount")
        .ok_or_else(|| anyhow!("missing amount"))?;
    Ok(Amount::Shannons(wallet::parse_amount(amount)?))
}

async fn balance(settings: &Settings, args: &ArgMatches) -> Result<()> {
    let network = network_of(args)?;
    let address = args
        .get_one::<String>("address")
        .ok_or_else(|| anyhow!("missing address"))?;
    let address = Address::parse_for(network, address)?;
    let (client, _) = rpc_client(settings, network, args)?;
    let capacity = client.capacity_of(address.lock()).await?;
    println!("Balance: {:#}", HumanCapacity::from(capacity));
    Ok(())
}

async fn transfer(
    settings: &Settings,
    args: &ArgMatches,
    amount: Amount,
    key: Option<SignerKey>,
) -> Result<()> {
    let network = network_of(args)?;
    network.ensure_test_network("transferring")?;
    let to = receiver(network, args)?;
    let key = match key {
        Some(key) => key,
        None => signer_key(network, args.get_one::<String>("privkey"))?,
    };
    let (client, rpc_url) = rpc_client(settings, network, args)?;
    info!(
        "Transfer from {} to {} on {} via {}",
        Address::new(network, key.lock_script()),
        to,
        network,
        rpc_url
    );
    let tx_hash = client.transfer(to.lock(), amount, &key).await?;
    println!("Transaction sent: {:#x}", tx_hash);
    Ok(())
}

async fn deploy(settings: &Settings, args: &ArgMatches) -> Result<()> {
    let network = network_of(args)?;
    network.ensure_deployable()?;
    let key = signer_key(network, args.get_one::<String>("privkey"))?;

    let config = args.get_one::<PathBuf>("config").map(PathBuf::as_path);
    let target = args.get_one::<PathBuf>("target").cloned();
    let output = args.get_one::<PathBuf>("output").cloned();
    let (target, output) = match (target, output) {
        (Some(target), Some(output)) => (target, output),
        (target, output) => {
            let context = load_project_context(config);
            let target = match (target, &context) {
                (Some(target), _) => target,
                (None, Ok(context)) => context.contract_bin_path(),
                (None, Err(err)) => bail!("--target is not set and {}", err),
            };
            let output = match (output, &context) {
                (Some(output), _) => output,
                (None, Ok(context)) => context.deployment_path(),
                (None, Err(_)) => PathBuf::from(DEFAULT_DEPLOYMENT_DIR),
            };
            (target, output)
        }
    };

    let (client, rpc_url) = rpc_client(settings, network, args)?;
    let store = MigrationStore::new(output);
    let client = client.with_store(store.clone());
    info!(
        "Deploy {} to {} via {} as {:#x}",
        target.display(),
        network,
        rpc_url,
        key.lock_arg()
    );

    let deployer = Deployer::new(&client, store, key);
    let outcome = deployer
        .deploy_target(&target, args.get_flag("type-id"))
        .await?;
    for artifact in &outcome.artifacts {
        println!("{}: {}", artifact.artifact.name, artifact.status);
    }
    let recipes = outcome.recipes();
    if !recipes.is_empty() {
        println!("{}", Plan::new(network.as_str(), &recipes).to_yaml()?);
        println!(
            "Migrations recorded in {}",
            deployer.store().network_dir(network).display()
        );
    }
    if let Some((artifact, status)) = outcome.failure() {
        bail!("{}: {}", artifact.name, status);
    }
    if let Some(err) = outcome.registry_error {
        bail!("update {} failed: {}", registry::REGISTRY_FILE, err);
    }
    println!("Done");
    Ok(())
}

fn write_json(path: &Path, value: &serde_json::Value) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    fs::write(path, serde_json::to_string_pretty(value)?)
        .with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

fn system_scripts(settings: &Settings, args: &ArgMatches) -> Result<()> {
    if let Some(output) = args.get_one::<PathBuf>("output") {
        let document = export::all_networks_json(system::devnet_scripts(settings)?);
        write_json(output, &document)?;
        println!("System scripts of all networks written to {}", output.display());
        return Ok(());
    }
    let network = network_of(args)?;
    let style: ExportStyle = args
        .get_one::<String>("export-style")
        .map(|style| style.parse())
        .transpose()?
        .unwrap_or_default();
    let scripts = system::system_scripts(network, settings)?.ok_or_else(|| {
        anyhow!("{} system scripts are not available, run `offckb node` first", network)
    })?;
    println!("{}", export::render(&scripts, network, style)?);
    Ok(())
}

fn sync_scripts(settings: &Settings, args: &ArgMatches) -> Result<()> {
    let context = load_project_context(args.get_one::<PathBuf>("config").map(PathBuf::as_path))?;
    let info_path = context.contract_info_path_or_err()?;
    let system = export::all_networks_json(system::devnet_scripts(settings)?);
    write_json(&info_path.join(SYSTEM_SCRIPTS_FILE), &system)?;
    let store = MigrationStore::new(context.deployment_path());
    let mine = serde_json::to_value(registry::generate_all(&store)?)?;
    write_json(&info_path.join(MY_SCRIPTS_FILE), &mine)?;
    println!("Scripts synced to {}", info_path.display());
    Ok(())
}

async fn debug(settings: &Settings, args: &ArgMatches) -> Result<()> {
    let network = network_of(args)?;
    let tx_hash = debugger::parse_tx_hash(
        args.get_one::<String>("tx-hash")
            .ok_or_else(|| anyhow!("--tx-hash is required"))?,
    )?;
    let single = args
        .get_one::<String>("single-script")
        .map(|value| debugger::parse_single_script(value))
        .transpose()?;
    let bin = args.get_one::<PathBuf>("bin").map(PathBuf::as_path);
    let runner = debugger::select_debugger(settings)?;
    debugger::debug_transaction(settings, network, &tx_hash, single, bin, runner.as_ref()).await
}

fn config(settings: &mut Settings, args: &ArgMatches) -> Result<()> {
    let item = |args: &ArgMatches| -> Result<ConfigItem> {
        args.get_one::<String>("item")
            .ok_or_else(|| anyhow!("missing config item"))?
            .parse()
    };
    match args.subcommand() {
        Some(("list", _)) => {
            println!("{}", toml::to_string_pretty(settings)?);
            return Ok(());
        }
        Some(("get", args)) => {
            match settings.get_item(item(args)?) {
                Some(value) => println!("{}", value),
                None => println!("(not set)"),
            }
            return Ok(());
        }
        Some(("set", args)) => {
            let value = args
                .get_one::<String>("value")
                .ok_or_else(|| anyhow!("missing config value"))?;
            settings.set_item(item(args)?, value)?;
        }
        Some(("rm", args)) => {
            settings.remove_item(item(args)?, &Settings::default_data_dir());
        }
        _ => bail!("unknown config subcommand"),
    }
    let path = Settings::default_path();
    settings.save(&path)?;
    println!("Settings saved to {}", path.display());
    Ok(())
}

async fn dispatch(mut settings: Settings, matches: ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("node", args)) => node::start_node(&settings, network_of(args)?).await?,
        Some(("proxy-rpc", args)) => {
            let network = network_of(args)?;
            let network_settings = settings.network(network);
            let upstream = args
                .get_one::<String>("ckb-rpc")
                .cloned()
                .unwrap_or_else(|| network_settings.rpc_url.clone());
            let port = args
                .get_one::<u16>("port")
                .copied()
                .unwrap_or(network_settings.rpc_proxy_port);
            node::run_proxy(&settings, network, &upstream, port).await?;
        }
        Some(("status", args)) => {
            node::status(&settings, network_of(args)?).await;
        }
        Some(("clean", args)) => {
            let confirmed = args.get_flag("yes")
                || ask_for_confirm("Remove all devnet chain data and recorded transactions?")?;
            if confirmed {
                node::clean(&settings)?;
            }
        }
        Some(("deploy", args)) => deploy(&settings, args).await?,
        Some(("system-scripts", args)) => system_scripts(&settings, args)?,
        Some(("sync-scripts", args)) => sync_scripts(&settings, args)?,
        Some(("debug", args)) => debug(&settings, args).await?,
        Some(("config", args)) => config(&mut settings, args)?,
        Some(("check", _)) => {
            let min_version: ToolVersion = settings.tools.ckb_debugger.min_version.parse()?;
            Checker::build(&settings.ckb_binary(), min_version).print_report();
        }
        Some(("accounts", _)) => {
            println!("Devnet accounts, never use them on testnet or mainnet!");
            print!("{}", wallet::accounts_report(&wallet::devnet_accounts()?)?);
        }
        Some(("balance", args)) => balance(&settings, args).await?,
        Some(("transfer", args)) => transfer(&settings, args, amount_of(args)?, None).await?,
        Some(("transfer-all", args)) => transfer(&settings, args, Amount::All, None).await?,
        Some(("deposit", args)) => {
            let key = wallet::deposit_key(network_of(args)?)?;
            transfer(&settings, args, amount_of(args)?, Some(key)).await?
        }
        Some((command, _)) => bail!("unrecognize command '{}'", command),
        None => bail!("no command given, see --help"),
    }
    Ok(())
}

fn run_cli() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let matches = build_cli().get_matches();
    let settings = Settings::load(&Settings::default_path(), &Settings::default_data_dir())?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(dispatch(settings, matches))
}

fn main() {
    let backtrace_level = env::var("RUST_BACKTRACE").unwrap_or_default();
    let enable_backtrace = !backtrace_level.is_empty() && backtrace_level != "0";
    match run_cli() {
        Ok(_) => {}
        err if enable_backtrace => {
            err.unwrap();
        }
        Err(err) => {
            eprintln!("error: {}", err);
            exit(-1);
        }
    }
}
