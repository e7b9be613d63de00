use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::ffi::OsStr;
use std::path::PathBuf;
use tracing::info;

use super::{is_dir, list_dirs, path_exists, run_command, unsupported};
use crate::config::AgentConfig;
use crate::core::jobs::{JobAction, JobContext, ResourceKind, ResourceManager, ServiceAction};
use crate::error::JobError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceInfo {
    pub name: String,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct ServiceHandle {
    pub name: String,
    pub path: PathBuf,
    pub enabled_link: PathBuf,
}

/// runit services. A service is a directory under `services/`; it is
/// enabled by linking it into `services-enabled/`, where runsvdir picks it
/// up, and controlled with `sv`.
pub struct ServiceManager {
    root: PathBuf,
    enabled_root: PathBuf,
    sv: String,
}

impl ServiceManager {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            root: config.service_dir.clone(),
            enabled_root: config.service_dir_enabled.clone(),
            sv: config.sv_binary.clone(),
        }
    }

    fn handle(&self, name: &str) -> ServiceHandle {
        ServiceHandle {
            name: name.to_string(),
            path: self.root.join(name),
            enabled_link: self.enabled_root.join(name),
        }
    }

    pub async fn get(&self, name: &str) -> Result<ServiceInfo, JobError> {
        let handle = self.handle(name);
        if !is_dir(&handle.path).await {
            return Err(JobError::not_found(ResourceKind::Service, name));
        }
        Ok(ServiceInfo {
            name: handle.name,
            enabled: path_exists(&handle.enabled_link).await,
        })
    }

    pub async fn list(&self) -> Result<Vec<ServiceInfo>, JobError> {
        let mut services = Vec::new();
        for name in list_dirs(&self.root).await? {
            let enabled = path_exists(&self.handle(&name).enabled_link).await;
            services.push(ServiceInfo { name, enabled });
        }
        Ok(services)
    }

    async fn enable(&self, handle: &ServiceHandle) -> Result<(), JobError> {
        if path_exists(&handle.enabled_link).await {
            return Ok(());
        }
        tokio::fs::create_dir_all(&self.enabled_root).await?;
        tokio::fs::symlink(&handle.path, &handle.enabled_link).await?;
        Ok(())
    }

    async fn disable(&self, handle: &ServiceHandle) -> Result<(), JobError> {
        if path_exists(&handle.enabled_link).await {
            tokio::fs::remove_file(&handle.enabled_link).await?;
        }
        Ok(())
    }

    async fn control(&self, handle: &ServiceHandle, action: ServiceAction) -> Result<(), JobError> {
        if !path_exists(&handle.enabled_link).await {
            return Err(JobError::failed(format!("Service '{}' is not enabled", handle.name)));
        }
        run_command(
            &self.sv,
            [OsStr::new(action.as_str()), handle.enabled_link.as_os_str()],
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ResourceManager for ServiceManager {
    type Handle = ServiceHandle;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Service
    }

    async fn resolve(&self, name: &str) -> Result<ServiceHandle, JobError> {
        Ok(self.handle(name))
    }

    async fn exists(&self, handle: &ServiceHandle) -> bool {
        is_dir(&handle.path).await
    }

    async fn execute(&self, handle: &ServiceHandle, action: &JobAction, ctx: &JobContext) -> Result<Value, JobError> {
        let JobAction::ServiceAction(service_action) = action else {
            return Err(unsupported(self.kind(), action));
        };

        match service_action {
            ServiceAction::Enable => self.enable(handle).await?,
            ServiceAction::Disable => self.disable(handle).await?,
            ServiceAction::Start | ServiceAction::Stop | ServiceAction::Restart => {
                ctx.message(format!("sv {}", service_action.as_str()));
                self.control(handle, *service_action).await?
            }
        }

        info!(service = %handle.name, action = service_action.as_str(), "Service action completed");
        Ok(json!({
            "name": handle.name,
            "action": service_action.as_str(),
            "enabled": path_exists(&handle.enabled_link).await,
        }))
    }
}
