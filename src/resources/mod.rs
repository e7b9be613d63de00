//! Filesystem-backed resource managers, one per [`ResourceKind`].

pub mod bundles;
pub mod ca;
pub mod instances;
pub mod services;

pub use bundles::{BundleInfo, BundleManager};
pub use ca::{SigningRequestInfo, SigningRequestManager};
pub use instances::{InstanceInfo, InstanceManager};
pub use services::{ServiceInfo, ServiceManager};

use std::ffi::OsStr;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

use crate::core::jobs::{JobAction, ResourceKind};
use crate::error::JobError;

/// Run an external program, returning its stdout. A non-zero exit becomes
/// a job failure carrying the program's stderr.
pub(crate) async fn run_command<I, S>(program: &str, args: I) -> Result<String, JobError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| JobError::failed(format!("failed to run {}: {}", program, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        debug!(program, status = ?output.status.code(), "Command failed");
        return Err(JobError::failed(if stderr.is_empty() {
            format!("{} exited with {}", program, output.status)
        } else {
            format!("{} exited with {}: {}", program, output.status, stderr)
        }));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

pub(crate) fn unsupported(kind: ResourceKind, action: &JobAction) -> JobError {
    JobError::failed(format!("{} does not support the '{}' action", kind, action.name()))
}

pub(crate) async fn path_exists(path: &Path) -> bool {
    tokio::fs::symlink_metadata(path).await.is_ok()
}

pub(crate) async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false)
}

/// Names of the subdirectories of `dir`, sorted. A missing directory has
/// no entries.
pub(crate) async fn list_dirs(dir: &Path) -> Result<Vec<String>, JobError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}
