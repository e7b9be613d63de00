use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

use super::{list_dirs, path_exists, unsupported};
use crate::core::jobs::{JobAction, JobContext, ResourceKind, ResourceManager};
use crate::error::JobError;

const ARCHIVE_SUFFIX: &str = ".tar.gz";

/// One uploaded bundle and its versions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BundleInfo {
    pub name: String,
    pub versions: Vec<String>,
}

/// A single bundle version, named `<bundle>@<version>`.
#[derive(Debug, Clone)]
pub struct BundleHandle {
    pub bundle: String,
    pub version: String,
    pub path: PathBuf,
}

/// Stores bundle archives under `bundles/<bundle>/<bundle>@<version>.tar.gz`.
pub struct BundleManager {
    root: PathBuf,
}

impl BundleManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn resource_name(bundle: &str, version: &str) -> String {
        format!("{}@{}", bundle, version)
    }

    pub fn parse_resource_name(name: &str) -> Option<(&str, &str)> {
        name.split_once('@')
            .filter(|(bundle, version)| !bundle.is_empty() && !version.is_empty())
    }

    /// Split an archive file name like `app@1.0.tar.gz` uploaded for
    /// `bundle` into its version.
    pub fn parse_archive_name<'a>(bundle: &str, file: &'a str) -> Option<&'a str> {
        let stem = file.strip_suffix(ARCHIVE_SUFFIX)?;
        let (name, version) = Self::parse_resource_name(stem)?;
        (name == bundle).then_some(version)
    }

    pub fn archive_path(&self, bundle: &str, version: &str) -> PathBuf {
        self.root
            .join(bundle)
            .join(format!("{}{}", Self::resource_name(bundle, version), ARCHIVE_SUFFIX))
    }

    pub async fn version_exists(&self, bundle: &str, version: &str) -> bool {
        path_exists(&self.archive_path(bundle, version)).await
    }

    pub async fn list(&self) -> Result<Vec<BundleInfo>, JobError> {
        let mut bundles = Vec::new();
        for name in list_dirs(&self.root).await? {
            let versions = self.versions(&name).await?;
            if !versions.is_empty() {
                bundles.push(BundleInfo { name, versions });
            }
        }
        Ok(bundles)
    }

    async fn versions(&self, bundle: &str) -> Result<Vec<String>, JobError> {
        let mut entries = match tokio::fs::read_dir(self.root.join(bundle)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut versions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file = entry.file_name().to_string_lossy().into_owned();
            if let Some(version) = Self::parse_archive_name(bundle, &file) {
                versions.push(version.to_string());
            }
        }
        versions.sort();
        Ok(versions)
    }

    pub async fn read_archive(&self, bundle: &str, version: &str) -> Result<Vec<u8>, JobError> {
        let path = self.archive_path(bundle, version);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(JobError::not_found(
                ResourceKind::Bundle,
                Self::resource_name(bundle, version),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, handle: &BundleHandle, archive: &[u8]) -> Result<(), JobError> {
        let dir = handle.path.parent().unwrap_or(Path::new(&self.root));
        tokio::fs::create_dir_all(dir).await?;

        let temp = dir.join(format!(".cast_tmp_{}{}", Uuid::new_v4().simple(), ARCHIVE_SUFFIX));
        let written = match tokio::fs::write(&temp, archive).await {
            Ok(()) => tokio::fs::rename(&temp, &handle.path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            if let Err(remove_err) = tokio::fs::remove_file(&temp).await {
                warn!(path = %temp.display(), error = %remove_err, "Unable to remove temporary bundle archive");
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Delete one version's archive. The `bundles/<bundle>/` directory is
    /// shared by every version and stays behind; `list` hides it once empty.
    async fn remove(&self, handle: &BundleHandle) -> Result<(), JobError> {
        tokio::fs::remove_file(&handle.path).await?;
        Ok(())
    }
}

#[async_trait]
impl ResourceManager for BundleManager {
    type Handle = BundleHandle;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Bundle
    }

    async fn resolve(&self, name: &str) -> Result<BundleHandle, JobError> {
        let (bundle, version) = Self::parse_resource_name(name)
            .ok_or_else(|| JobError::failed(format!("Invalid bundle resource name: {}", name)))?;

        Ok(BundleHandle {
            bundle: bundle.to_string(),
            version: version.to_string(),
            path: self.archive_path(bundle, version),
        })
    }

    async fn exists(&self, handle: &BundleHandle) -> bool {
        path_exists(&handle.path).await
    }

    async fn execute(&self, handle: &BundleHandle, action: &JobAction, ctx: &JobContext) -> Result<Value, JobError> {
        match action {
            JobAction::UploadBundle { archive, .. } => {
                self.store(handle, archive).await?;
                ctx.message(format!("stored {} bytes", archive.len()));
                info!(bundle = %handle.bundle, version = %handle.version, bytes = archive.len(), "Bundle stored");

                Ok(json!({
                    "name": handle.bundle,
                    "version": handle.version,
                    "bytes": archive.len(),
                }))
            }
            JobAction::DeleteBundle { .. } => {
                self.remove(handle).await?;
                info!(bundle = %handle.bundle, version = %handle.version, "Bundle removed");

                Ok(json!({ "name": handle.bundle, "version": handle.version }))
            }
            other => Err(unsupported(self.kind(), other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_archive_names() {
        assert_eq!(BundleManager::parse_archive_name("app", "app@1.0.tar.gz"), Some("1.0"));
        assert_eq!(BundleManager::parse_archive_name("app", "other@1.0.tar.gz"), None);
        assert_eq!(BundleManager::parse_archive_name("app", "app@1.0.zip"), None);
        assert_eq!(BundleManager::parse_archive_name("app", "app.tar.gz"), None);
        assert_eq!(BundleManager::parse_resource_name("app@"), None);
    }

    #[tokio::test]
    async fn test_list_reports_versions() {
        let dir = tempfile::tempdir().unwrap();
        let bundles = BundleManager::new(dir.path());

        let handle = bundles.resolve("app@1.0").await.unwrap();
        bundles.store(&handle, b"archive").await.unwrap();
        let handle = bundles.resolve("app@1.1").await.unwrap();
        bundles.store(&handle, b"archive").await.unwrap();

        assert_eq!(
            bundles.list().await.unwrap(),
            vec![BundleInfo {
                name: "app".to_string(),
                versions: vec!["1.0".to_string(), "1.1".to_string()],
            }]
        );
        assert!(bundles.version_exists("app", "1.1").await);

        bundles.remove(&handle).await.unwrap();
        let handle = bundles.resolve("app@1.0").await.unwrap();
        bundles.remove(&handle).await.unwrap();
        assert!(bundles.list().await.unwrap().is_empty());
        assert!(dir.path().join("app").is_dir());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_removing_last_version_does_not_break_concurrent_store() {
        let dir = tempfile::tempdir().unwrap();
        let bundles = Arc::new(BundleManager::new(dir.path()));

        for round in 0..50 {
            let old = bundles.resolve(&format!("app@{}", round)).await.unwrap();
            bundles.store(&old, b"old").await.unwrap();
            let new = bundles.resolve(&format!("app@{}", round + 1000)).await.unwrap();

            let remover = {
                let bundles = Arc::clone(&bundles);
                tokio::spawn(async move { bundles.remove(&old).await })
            };
            let storer = {
                let bundles = Arc::clone(&bundles);
                tokio::spawn(async move { bundles.store(&new, b"new").await })
            };

            remover.await.unwrap().unwrap();
            storer.await.unwrap().unwrap();
            assert!(bundles.version_exists("app", &(round + 1000).to_string()).await);

            let new = bundles.resolve(&format!("app@{}", round + 1000)).await.unwrap();
            bundles.remove(&new).await.unwrap();
        }
        assert!(bundles.list().await.unwrap().is_empty());
    }
}
