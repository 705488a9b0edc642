/// Project Context
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::io::ErrorKind as IOErrorKind;
use std::path::{Path, PathBuf};

pub const CONFIG_NAME: &str = "offckb.toml";
const DEFAULT_DEPLOYMENT_DIR: &str = "deployment";
pub const SYSTEM_SCRIPTS_FILE: &str = "system-scripts.json";
pub const MY_SCRIPTS_FILE: &str = "my-scripts.json";

/// Project file `offckb.toml`, paths are relative to the file.
///
/// ```toml
/// contract_bin_folder = "build/release"
/// contract_info_folder = "frontend/offckb"
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub contract_bin_folder: PathBuf,
    #[serde(default)]
    pub contract_info_folder: Option<PathBuf>,
    #[serde(default)]
    pub deployment_folder: Option<PathBuf>,
}

pub struct Context {
    pub project_path: PathBuf,
    pub config: ProjectConfig,
}

impl Context {
    pub fn contract_bin_path(&self) -> PathBuf {
        self.project_path.join(&self.config.contract_bin_folder)
    }

    pub fn contract_info_path(&self) -> Option<PathBuf> {
        self.config
            .contract_info_folder
            .as_ref()
            .map(|folder| self.project_path.join(folder))
    }

    pub fn deployment_path(&self) -> PathBuf {
        let folder = self
            .config
            .deployment_folder
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DEPLOYMENT_DIR));
        self.project_path.join(folder)
    }

    pub fn contract_info_path_or_err(&self) -> Result<PathBuf> {
        self.contract_info_path().ok_or_else(|| {
            anyhow!(
                "contract_info_folder is not set in {}",
                self.project_path.join(CONFIG_NAME).display()
            )
        })
    }
}

/// Load the project config from `config_path`, or from `offckb.toml` in the
/// current directory.
pub fn load_project_context(config_path: Option<&Path>) -> Result<Context> {
    let path = match config_path {
        Some(path) => path.to_path_buf(),
        None => env::current_dir()?.join(CONFIG_NAME),
    };
    let project_path = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    match fs::read_to_string(&path) {
        Ok(content) => {
            let config: ProjectConfig = toml::from_str(&content)
                .map_err(|err| anyhow!("invalid {}: {}", path.display(), err))?;
            Ok(Context {
                config,
                project_path,
            })
        }
        Err(err) if err.kind() == IOErrorKind::NotFound => Err(anyhow!(
            "Can't found {}, not in the project directory",
            path.display()
        )),
        Err(err) => Err(err.into()),
    }
}
