use serde::Deserialize;
use std::sync::Arc;

use super::{require_param, validate_name};
use crate::core::jobs::{Job, JobAction};
use crate::error::{AppError, JobError, Result};
use crate::resources::{BundleManager, InstanceInfo};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct CreateInstanceParams {
    pub bundle_name: Option<String>,
    pub bundle_version: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpgradeInstanceParams {
    pub bundle_version: Option<String>,
}

pub async fn list_instances(state: &AppState) -> Result<Vec<InstanceInfo>> {
    Ok(state.instances.list().await?)
}

pub async fn get_instance(state: &AppState, name: &str) -> Result<InstanceInfo> {
    validate_name(name, "instance name")?;
    Ok(state.instances.get(name).await?)
}

pub async fn create_instance(state: &AppState, name: &str, params: CreateInstanceParams) -> Result<Arc<Job>> {
    validate_name(name, "instance name")?;
    let bundle_name = require_param(params.bundle_name, "bundle_name")?;
    let bundle_version = require_param(params.bundle_version, "bundle_version")?;
    validate_name(&bundle_name, "bundle name")?;
    validate_name(&bundle_version, "bundle version")?;
    ensure_bundle_exists(state, &bundle_name, &bundle_version).await?;

    state
        .jobs
        .run(Job::new(
            name,
            JobAction::CreateInstance {
                bundle_name,
                bundle_version,
            },
        ))
        .await
}

pub async fn upgrade_instance(state: &AppState, name: &str, params: UpgradeInstanceParams) -> Result<Arc<Job>> {
    validate_name(name, "instance name")?;
    let bundle_version = require_param(params.bundle_version, "bundle_version")?;
    validate_name(&bundle_version, "bundle version")?;

    // An unknown instance is left for the job to report.
    match state.instances.get(name).await {
        Ok(instance) => ensure_bundle_exists(state, &instance.bundle_name, &bundle_version).await?,
        Err(JobError::NotFound { .. }) => {}
        Err(e) => return Err(e.into()),
    }

    state
        .jobs
        .run(Job::new(name, JobAction::UpgradeInstance { bundle_version }))
        .await
}

pub async fn delete_instance(state: &AppState, name: &str) -> Result<Arc<Job>> {
    validate_name(name, "instance name")?;
    state.jobs.run(Job::new(name, JobAction::DestroyInstance)).await
}

async fn ensure_bundle_exists(state: &AppState, bundle_name: &str, bundle_version: &str) -> Result<()> {
    if state.bundles.version_exists(bundle_name, bundle_version).await {
        return Ok(());
    }
    Err(AppError::BadRequest(format!(
        "Bundle '{}' does not exist",
        BundleManager::resource_name(bundle_name, bundle_version)
    )))
}
