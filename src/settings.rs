//! User level settings.
//!
//! Settings live in `<config dir>/offckb/settings.toml`. The file only needs to
//! hold the values a user changed, everything else is filled in from
//! [`Settings::with_data_dir`]. A `Settings` value is loaded once at start-up and
//! handed to whatever needs it.

use crate::network::Network;
use anyhow::{anyhow, Context as _, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const SETTINGS_FILE: &str = "settings.toml";
/// Main config file of a ckb node folder.
pub const CKB_CONFIG_FILE: &str = "ckb.toml";
const APP_DIR: &str = "offckb";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// HTTP proxy used for outbound RPC requests, e.g. `http://127.0.0.1:1080`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    pub bins: BinsSettings,
    pub devnet: DevnetSettings,
    pub testnet: NetworkSettings,
    pub mainnet: NetworkSettings,
    pub tools: ToolsSettings,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinsSettings {
    pub root_folder: PathBuf,
    pub default_ckb_version: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSettings {
    pub rpc_url: String,
    pub rpc_proxy_port: u16,
    pub transactions_path: PathBuf,
    pub debug_full_transactions_path: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevnetSettings {
    #[serde(flatten)]
    pub network: NetworkSettings,
    pub config_path: PathBuf,
    pub data_path: PathBuf,
    /// Devnet config folder copied on first start instead of `ckb init`,
    /// its genesis can carry more system scripts than the stock dev chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_path: Option<PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolsSettings {
    pub ckb_debugger: CkbDebuggerSettings,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CkbDebuggerSettings {
    pub min_version: String,
    pub docker_image: String,
}

impl Settings {
    /// Default settings rooted at `data_dir`.
    pub fn with_data_dir(data_dir: &Path) -> Self {
        let network = |name: &str, rpc_url: &str, rpc_proxy_port: u16| NetworkSettings {
            rpc_url: rpc_url.to_string(),
            rpc_proxy_port,
            transactions_path: data_dir.join(name).join("transactions"),
            debug_full_transactions_path: data_dir.join(name).join("full-transactions"),
        };
        Settings {
            proxy: None,
            bins: BinsSettings {
                root_folder: data_dir.join("bins"),
                default_ckb_version: "0.201.0".to_string(),
            },
            devnet: DevnetSettings {
                network: network("devnet", "http://localhost:8114", 28114),
                config_path: data_dir.join("devnet"),
                data_path: data_dir.join("devnet").join("data"),
                template_path: None,
            },
            testnet: network("testnet", "https://testnet.ckb.dev", 38114),
            mainnet: network("mainnet", "https://mainnet.ckb.dev", 48114),
            tools: ToolsSettings {
                ckb_debugger: CkbDebuggerSettings {
                    min_version: "0.200.0".to_string(),
                    docker_image: "nervos/ckb-debugger:latest".to_string(),
                },
            },
        }
    }

    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join(SETTINGS_FILE)
    }

    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }

    /// Load the settings file, missing keys take their default value.
    pub fn load(path: &Path, data_dir: &Path) -> Result<Self> {
        let defaults = Self::with_data_dir(data_dir);
        if !path.exists() {
            return Ok(defaults);
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("read settings {}", path.display()))?;
        let user: toml::Value = toml::from_str(&content)
            .with_context(|| format!("parse settings {}", path.display()))?;
        let mut merged = toml::Value::try_from(&defaults)?;
        merge_value(&mut merged, user);
        let settings = merged
            .try_into::<Settings>()
            .with_context(|| format!("invalid settings {}", path.display()))?;
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn network(&self, network: Network) -> &NetworkSettings {
        match network {
            Network::Devnet => &self.devnet.network,
            Network::Testnet => &self.testnet,
            Network::Mainnet => &self.mainnet,
        }
    }

    pub fn proxy_rpc_url(&self, network: Network) -> String {
        format!("http://127.0.0.1:{}", self.network(network).rpc_proxy_port)
    }

    pub fn ckb_binary_path(&self, version: &str) -> PathBuf {
        self.bins.root_folder.join(version).join("ckb")
    }

    /// HTTP client for outbound requests, going through `proxy` when set.
    pub fn http_client(&self) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder().timeout(std::time::Duration::from_secs(60));
        if let Some(proxy) = &self.proxy {
            builder = builder.proxy(
                reqwest::Proxy::all(proxy.as_str())
                    .with_context(|| format!("invalid proxy {}", proxy))?,
            );
        }
        Ok(builder.build()?)
    }

    /// The installed `ckb` of the default version, else `ckb` from `PATH`.
    pub fn ckb_binary(&self) -> PathBuf {
        let installed = self.ckb_binary_path(&self.bins.default_ckb_version);
        if installed.is_file() {
            installed
        } else {
            PathBuf::from("ckb")
        }
    }

    /// Path of a transaction recorded by the RPC proxy.
    pub fn transaction_file(&self, network: Network, tx_hash: &str) -> PathBuf {
        self.network(network)
            .transactions_path
            .join(format!("{}.json", tx_hash))
    }

    /// Path of a transaction with all resolved cells, as consumed by ckb-debugger.
    pub fn full_transaction_file(&self, network: Network, tx_hash: &str) -> PathBuf {
        self.network(network)
            .debug_full_transactions_path
            .join(format!("{}.json", tx_hash))
    }
}

fn merge_value(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_value(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Keys exposed through `offckb config`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigItem {
    Proxy,
    CkbVersion,
    DevnetTemplate,
}

impl FromStr for ConfigItem {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "proxy" => Ok(ConfigItem::Proxy),
            "ckb-version" => Ok(ConfigItem::CkbVersion),
            "devnet-template" => Ok(ConfigItem::DevnetTemplate),
            _ => Err(anyhow!(
                "Unexpected config item '{}', expect one of: proxy, ckb-version, devnet-template",
                s
            )),
        }
    }
}

impl Settings {
    pub fn get_item(&self, item: ConfigItem) -> Option<String> {
        match item {
            ConfigItem::Proxy => self.proxy.clone(),
            ConfigItem::CkbVersion => Some(self.bins.default_ckb_version.clone()),
            ConfigItem::DevnetTemplate => self
                .devnet
                .template_path
                .as_ref()
                .map(|path| path.display().to_string()),
        }
    }

    pub fn set_item(&mut self, item: ConfigItem, value: &str) -> Result<()> {
        match item {
            ConfigItem::Proxy => {
                reqwest::Url::parse(value)
                    .map_err(|err| anyhow!("invalid proxy url '{}': {}", value, err))?;
                self.proxy = Some(value.to_string());
            }
            ConfigItem::CkbVersion => {
                let valid = value.split('.').count() == 3
                    && value.split('.').all(|n| n.parse::<u32>().is_ok());
                if !valid {
                    return Err(anyhow!(
                        "invalid ckb version '{}', expect something like 0.201.0",
                        value
                    ));
                }
                self.bins.default_ckb_version = value.to_string();
            }
            ConfigItem::DevnetTemplate => {
                let path = PathBuf::from(value);
                if !path.join(CKB_CONFIG_FILE).is_file() {
                    return Err(anyhow!(
                        "{} is not a devnet config folder, {} not found",
                        value,
                        CKB_CONFIG_FILE
                    ));
                }
                self.devnet.template_path = Some(path);
            }
        }
        Ok(())
    }

    pub fn remove_item(&mut self, item: ConfigItem, data_dir: &Path) {
        match item {
            ConfigItem::Proxy => self.proxy = None,
            ConfigItem::CkbVersion => {
                self.bins.default_ckb_version =
                    Self::with_data_dir(data_dir).bins.default_ckb_version
            }
            ConfigItem::DevnetTemplate => self.devnet.template_path = None,
        }
    }
}
