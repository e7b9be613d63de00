use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use super::bundles::BundleManager;
use super::{is_dir, list_dirs, path_exists, run_command, unsupported};
use crate::core::facts::FactsProvider;
use crate::core::jobs::{JobAction, JobContext, ResourceKind, ResourceManager};
use crate::error::JobError;

const METADATA_FILE: &str = "instance.json";

/// Metadata kept in `instance.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub name: String,
    pub bundle_name: String,
    pub bundle_version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct InstanceHandle {
    pub name: String,
    pub root: PathBuf,
}

impl InstanceHandle {
    fn metadata_path(&self) -> PathBuf {
        self.root.join(METADATA_FILE)
    }

    fn version_path(&self, bundle_name: &str, version: &str) -> PathBuf {
        self.root
            .join("versions")
            .join(BundleManager::resource_name(bundle_name, version))
    }

    fn current_link(&self) -> PathBuf {
        self.root.join("current")
    }
}

/// Deployed application instances under `applications/<name>/`.
///
/// Each instance keeps every deployed version extracted side by side under
/// `versions/` and points `current` at the active one.
pub struct InstanceManager {
    root: PathBuf,
    bundles: Arc<BundleManager>,
    facts: FactsProvider,
}

impl InstanceManager {
    pub fn new(root: impl Into<PathBuf>, bundles: Arc<BundleManager>, facts: FactsProvider) -> Self {
        Self {
            root: root.into(),
            bundles,
            facts,
        }
    }

    fn handle(&self, name: &str) -> InstanceHandle {
        InstanceHandle {
            name: name.to_string(),
            root: self.root.join(name),
        }
    }

    /// Read an instance's metadata. An instance whose metadata has not been
    /// written yet is still being created and is reported as missing.
    pub async fn get(&self, name: &str) -> Result<InstanceInfo, JobError> {
        let handle = self.handle(name);
        match read_metadata(&handle).await {
            Err(JobError::Failed(_)) if !path_exists(&handle.metadata_path()).await => {
                Err(JobError::not_found(ResourceKind::Instance, name))
            }
            result => result,
        }
    }

    pub async fn list(&self) -> Result<Vec<InstanceInfo>, JobError> {
        let mut instances = Vec::new();
        for name in list_dirs(&self.root).await? {
            match self.get(&name).await {
                Ok(info) => instances.push(info),
                Err(JobError::NotFound { .. }) => {}
                Err(e) => warn!(instance = %name, error = %e, "Skipping instance with unreadable metadata"),
            }
        }
        Ok(instances)
    }

    async fn create(
        &self,
        handle: &InstanceHandle,
        bundle_name: &str,
        bundle_version: &str,
        ctx: &JobContext,
    ) -> Result<InstanceInfo, JobError> {
        tokio::fs::create_dir_all(handle.root.join("data")).await?;
        tokio::fs::create_dir_all(handle.root.join("versions")).await?;

        self.prepare_version(handle, bundle_name, bundle_version, ctx).await?;
        activate_version(handle, &handle.version_path(bundle_name, bundle_version)).await?;

        let now = Utc::now();
        let info = InstanceInfo {
            name: handle.name.clone(),
            bundle_name: bundle_name.to_string(),
            bundle_version: bundle_version.to_string(),
            created_at: now,
            updated_at: now,
        };
        write_metadata(handle, &info).await?;
        Ok(info)
    }

    async fn upgrade(&self, handle: &InstanceHandle, version: &str, ctx: &JobContext) -> Result<InstanceInfo, JobError> {
        let mut info = read_metadata(handle).await?;

        if path_exists(&handle.version_path(&info.bundle_name, version)).await {
            return Err(JobError::failed(format!(
                "Instance '{}' already has version '{}'",
                handle.name, version
            )));
        }

        self.prepare_version(handle, &info.bundle_name, version, ctx).await?;
        activate_version(handle, &handle.version_path(&info.bundle_name, version)).await?;

        info.bundle_version = version.to_string();
        info.updated_at = Utc::now();
        write_metadata(handle, &info).await?;
        Ok(info)
    }

    /// Extract a bundle version into the instance's `versions/` directory.
    async fn prepare_version(
        &self,
        handle: &InstanceHandle,
        bundle_name: &str,
        version: &str,
        ctx: &JobContext,
    ) -> Result<(), JobError> {
        let archive = self.bundles.archive_path(bundle_name, version);
        if !path_exists(&archive).await {
            return Err(JobError::failed(format!(
                "Bundle '{}' does not exist",
                BundleManager::resource_name(bundle_name, version)
            )));
        }

        let tar = self
            .facts
            .gnutar()
            .await
            .ok_or_else(|| JobError::failed("No usable GNU tar binary found"))?;

        let target = handle.version_path(bundle_name, version);
        tokio::fs::create_dir_all(&target).await?;

        ctx.message(format!("extracting {}@{}", bundle_name, version));
        let extracted = run_command(
            &tar,
            [
                OsStr::new("-xzf"),
                archive.as_os_str(),
                OsStr::new("-C"),
                target.as_os_str(),
            ],
        )
        .await;

        if let Err(e) = extracted {
            if let Err(remove_err) = tokio::fs::remove_dir_all(&target).await {
                warn!(path = %target.display(), error = %remove_err, "Unable to remove partially extracted version");
            }
            return Err(e);
        }
        Ok(())
    }
}

/// Point `current` at `version_path` by renaming a fresh symlink over it.
async fn activate_version(handle: &InstanceHandle, version_path: &Path) -> Result<(), JobError> {
    let new_link = handle.root.join("new");
    if path_exists(&new_link).await {
        tokio::fs::remove_file(&new_link).await?;
    }
    tokio::fs::symlink(version_path, &new_link).await?;
    tokio::fs::rename(&new_link, handle.current_link()).await?;
    Ok(())
}

async fn read_metadata(handle: &InstanceHandle) -> Result<InstanceInfo, JobError> {
    let raw = tokio::fs::read(handle.metadata_path()).await?;
    Ok(serde_json::from_slice(&raw)?)
}

async fn write_metadata(handle: &InstanceHandle, info: &InstanceInfo) -> Result<(), JobError> {
    let temp = handle.root.join(format!(".{}.tmp", METADATA_FILE));
    tokio::fs::write(&temp, serde_json::to_vec_pretty(info)?).await?;
    tokio::fs::rename(&temp, handle.metadata_path()).await?;
    Ok(())
}

#[async_trait]
impl ResourceManager for InstanceManager {
    type Handle = InstanceHandle;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Instance
    }

    async fn resolve(&self, name: &str) -> Result<InstanceHandle, JobError> {
        Ok(self.handle(name))
    }

    async fn exists(&self, handle: &InstanceHandle) -> bool {
        is_dir(&handle.root).await
    }

    async fn execute(&self, handle: &InstanceHandle, action: &JobAction, ctx: &JobContext) -> Result<Value, JobError> {
        match action {
            JobAction::CreateInstance {
                bundle_name,
                bundle_version,
            } => match self.create(handle, bundle_name, bundle_version, ctx).await {
                Ok(info) => {
                    info!(instance = %handle.name, bundle = %bundle_name, version = %bundle_version, "Instance created");
                    Ok(serde_json::to_value(info)?)
                }
                Err(e) => {
                    // A half-built instance would block every later create.
                    if let Err(remove_err) = tokio::fs::remove_dir_all(&handle.root).await {
                        warn!(instance = %handle.name, error = %remove_err, "Unable to remove failed instance");
                    }
                    Err(e)
                }
            },
            JobAction::UpgradeInstance { bundle_version } => {
                let info = self.upgrade(handle, bundle_version, ctx).await?;
                info!(instance = %handle.name, version = %bundle_version, "Instance upgraded");
                Ok(serde_json::to_value(info)?)
            }
            JobAction::DestroyInstance => {
                tokio::fs::remove_dir_all(&handle.root).await?;
                info!(instance = %handle.name, "Instance destroyed");
                Ok(json!({ "name": handle.name }))
            }
            other => Err(unsupported(self.kind(), other)),
        }
    }
}
