//! Deploy contract binaries and keep their migration history.

pub mod binary;
pub mod migration;
pub mod plan;
pub mod recipe;

use crate::chain::{ChainClient, ChainError, SignerKey, DEFAULT_CONFIRM_TIMEOUT};
use crate::config::DeploymentOptions;
use crate::network::Network;
use crate::scripts::registry;
use binary::{BinaryArtifact, DiscoveryError};
use ckb_types::{bytes::Bytes, H256};
use log::{error, info};
use migration::{MigrationStore, StoreError};
use recipe::DeploymentRecipe;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeployError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Which transaction an artifact needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployPath {
    Plain,
    NewTypeId,
    Upgrade,
}

#[derive(Debug)]
pub enum ArtifactStatus {
    Deployed {
        recipe: DeploymentRecipe,
        migration: PathBuf,
    },
    Skipped(String),
    Failed(String),
    /// The transaction was sent but never seen committed.
    Unknown { tx_hash: H256, message: String },
    NotAttempted,
}

impl fmt::Display for ArtifactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactStatus::Deployed { recipe, .. } => match recipe.primary() {
                Some(cell) => write!(f, "deployed in {:#x}", cell.tx_hash),
                None => write!(f, "deployed"),
            },
            ArtifactStatus::Skipped(reason) => write!(f, "skipped: {}", reason),
            ArtifactStatus::Failed(reason) => write!(f, "failed: {}", reason),
            ArtifactStatus::Unknown { tx_hash, .. } => write!(
                f,
                "unknown state, verify transaction {:#x} manually",
                tx_hash
            ),
            ArtifactStatus::NotAttempted => write!(f, "not attempted"),
        }
    }
}

#[derive(Debug)]
pub struct ArtifactOutcome {
    pub artifact: BinaryArtifact,
    pub status: ArtifactStatus,
}

#[derive(Debug)]
pub struct DeployOutcome {
    pub network: Network,
    pub artifacts: Vec<ArtifactOutcome>,
    /// Set when `scripts.json` could not be refreshed.
    pub registry_error: Option<String>,
}

impl DeployOutcome {
    pub fn is_success(&self) -> bool {
        self.registry_error.is_none()
            && self.artifacts.iter().all(|outcome| {
                matches!(
                    outcome.status,
                    ArtifactStatus::Deployed { .. } | ArtifactStatus::Skipped(_)
                )
            })
    }

    pub fn recipes(&self) -> Vec<DeploymentRecipe> {
        self.artifacts
            .iter()
            .filter_map(|outcome| match &outcome.status {
                ArtifactStatus::Deployed { recipe, .. } => Some(recipe.clone()),
                _ => None,
            })
            .collect()
    }

    /// First failure of the run.
    pub fn failure(&self) -> Option<(&BinaryArtifact, &ArtifactStatus)> {
        self.artifacts
            .iter()
            .find(|outcome| {
                matches!(
                    outcome.status,
                    ArtifactStatus::Failed(_) | ArtifactStatus::Unknown { .. }
                )
            })
            .map(|outcome| (&outcome.artifact, &outcome.status))
    }
}

/// Sends artifacts one at a time, each one confirmed and recorded before the
/// next is sent. The first failure stops the run.
pub struct Deployer<'a, C: ChainClient> {
    client: &'a C,
    store: MigrationStore,
    key: SignerKey,
    confirm_timeout: Duration,
}

impl<'a, C: ChainClient> Deployer<'a, C> {
    pub fn new(client: &'a C, store: MigrationStore, key: SignerKey) -> Self {
        Deployer {
            client,
            store,
            key,
            confirm_timeout: DEFAULT_CONFIRM_TIMEOUT,
        }
    }

    pub fn with_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.confirm_timeout = timeout;
        self
    }

    pub fn store(&self) -> &MigrationStore {
        &self.store
    }

    /// Discover binaries at `target` and deploy them.
    pub async fn deploy_target(
        &self,
        target: &Path,
        enable_type_id: bool,
    ) -> Result<DeployOutcome, DeployError> {
        let classified = binary::classify(binary::discover(target)?);
        let mut outcome = self
            .deploy_artifacts(classified.deployable, enable_type_id)
            .await;
        let skipped = classified
            .skipped
            .into_iter()
            .map(|(artifact, reason)| ArtifactOutcome {
                artifact,
                status: ArtifactStatus::Skipped(reason),
            });
        outcome.artifacts.extend(skipped);
        Ok(outcome)
    }

    pub async fn deploy_artifacts(
        &self,
        artifacts: Vec<BinaryArtifact>,
        enable_type_id: bool,
    ) -> DeployOutcome {
        let network = self.client.network();
        let mut outcomes = Vec::with_capacity(artifacts.len());
        let mut failed = false;
        for artifact in artifacts {
            if failed {
                outcomes.push(ArtifactOutcome {
                    artifact,
                    status: ArtifactStatus::NotAttempted,
                });
                continue;
            }
            let status = match self.deploy_one(&artifact, enable_type_id).await {
                Ok((recipe, migration)) => ArtifactStatus::Deployed { recipe, migration },
                Err(DeployError::Chain(ChainError::ConfirmTimeout { tx_hash, timeout })) => {
                    failed = true;
                    let message = ChainError::ConfirmTimeout {
                        tx_hash: tx_hash.clone(),
                        timeout,
                    }
                    .to_string();
                    error!("{}: {}", artifact.name, message);
                    ArtifactStatus::Unknown { tx_hash, message }
                }
                Err(err) => {
                    failed = true;
                    error!("deploy {} failed: {}", artifact.name, err);
                    ArtifactStatus::Failed(err.to_string())
                }
            };
            outcomes.push(ArtifactOutcome { artifact, status });
        }

        let registry_error = match registry::update_network(&self.store, network) {
            Ok(()) => None,
            Err(err) => {
                error!("update script registry failed: {:#}", err);
                Some(err.to_string())
            }
        };
        DeployOutcome {
            network,
            artifacts: outcomes,
            registry_error,
        }
    }

    /// Type-id upgrades need a newest migration carrying a type-id.
    pub fn deploy_path(&self, name: &str, enable_type_id: bool) -> Result<DeployPath, StoreError> {
        if !enable_type_id {
            return Ok(DeployPath::Plain);
        }
        let deployed_with_type_id = self
            .store
            .find(name, self.client.network())?
            .and_then(|recipe| recipe.primary().and_then(|cell| cell.type_id.clone()))
            .is_some();
        if deployed_with_type_id {
            Ok(DeployPath::Upgrade)
        } else {
            Ok(DeployPath::NewTypeId)
        }
    }

    async fn deploy_one(
        &self,
        artifact: &BinaryArtifact,
        enable_type_id: bool,
    ) -> Result<(DeploymentRecipe, PathBuf), DeployError> {
        let network = self.client.network();
        let data = Bytes::from(artifact.read()?);
        let path = self.deploy_path(&artifact.name, enable_type_id)?;
        info!("deploy {} ({} bytes) as {:?}", artifact.name, artifact.size, path);
        let result = match path {
            DeployPath::Plain => self.client.deploy_script(data.clone(), &self.key).await?,
            DeployPath::NewTypeId => {
                self.client
                    .deploy_new_type_id_script(data.clone(), &self.key)
                    .await?
            }
            DeployPath::Upgrade => {
                self.client
                    .upgrade_type_id_script(&artifact.name, data.clone(), &self.key)
                    .await?
            }
        };
        info!(
            "contract {} sent in {:#x}, waiting for it to be committed",
            artifact.name, result.tx_hash
        );
        self.client
            .wait_for_tx_confirm(&result.tx_hash, self.confirm_timeout)
            .await?;
        info!("{:#x} committed", result.tx_hash);

        let recipe = DeploymentRecipe::from_result(&artifact.name, data.len(), &result);
        let options = DeploymentOptions::new(&artifact.path, enable_type_id, result.lock.clone());
        let migration = self.store.write(&recipe, &options, network)?;
        info!("migration recorded in {}", migration.display());
        Ok((recipe, migration))
    }
}
