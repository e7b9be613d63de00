use std::sync::Arc;

use super::validate_name;
use crate::core::jobs::{Job, JobAction, ServiceAction};
use crate::error::Result;
use crate::resources::ServiceInfo;
use crate::AppState;

pub async fn list_services(state: &AppState) -> Result<Vec<ServiceInfo>> {
    Ok(state.services.list().await?)
}

pub async fn get_service(state: &AppState, name: &str) -> Result<ServiceInfo> {
    validate_name(name, "service name")?;
    Ok(state.services.get(name).await?)
}

pub async fn service_action(state: &AppState, name: &str, action: &str) -> Result<Arc<Job>> {
    validate_name(name, "service name")?;
    let action: ServiceAction = action.parse()?;

    state
        .jobs
        .run(Job::new(name, JobAction::ServiceAction(action)))
        .await
}
