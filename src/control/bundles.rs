use axum::body::Bytes;
use std::sync::Arc;

use super::validate_name;
use crate::core::jobs::{Job, JobAction};
use crate::error::{AppError, Result};
use crate::resources::{BundleInfo, BundleManager};
use crate::AppState;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub async fn list_bundles(state: &AppState) -> Result<Vec<BundleInfo>> {
    Ok(state.bundles.list().await?)
}

/// Resolve `<bundle>/<bundle>@<version>.tar.gz` to its version.
fn archive_version<'a>(bundle: &str, file: &'a str) -> Result<&'a str> {
    validate_name(bundle, "bundle name")?;
    let version = BundleManager::parse_archive_name(bundle, file)
        .ok_or_else(|| AppError::NotFound("File not found".to_string()))?;
    validate_name(version, "bundle version")?;
    Ok(version)
}

pub async fn upload_bundle(state: &AppState, bundle: &str, file: &str, archive: Bytes) -> Result<Arc<Job>> {
    let version = archive_version(bundle, file)?;

    if !archive.starts_with(&GZIP_MAGIC) {
        return Err(AppError::BadRequest(
            "Bundle archive must be a gzip-compressed tarball".to_string(),
        ));
    }

    state
        .jobs
        .run(Job::new(
            BundleManager::resource_name(bundle, version),
            JobAction::UploadBundle {
                bundle: bundle.to_string(),
                version: version.to_string(),
                archive,
            },
        ))
        .await
}

pub async fn download_bundle(state: &AppState, bundle: &str, file: &str) -> Result<Vec<u8>> {
    let version = archive_version(bundle, file)?;
    Ok(state.bundles.read_archive(bundle, version).await?)
}

pub async fn delete_bundle(state: &AppState, bundle: &str, file: &str) -> Result<Arc<Job>> {
    let version = archive_version(bundle, file)?;

    state
        .jobs
        .run(Job::new(
            BundleManager::resource_name(bundle, version),
            JobAction::DeleteBundle {
                bundle: bundle.to_string(),
                version: version.to_string(),
            },
        ))
        .await
}
