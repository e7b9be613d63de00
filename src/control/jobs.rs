use std::sync::Arc;
use uuid::Uuid;

use crate::core::jobs::Job;
use crate::error::{AppError, Result};
use crate::AppState;

pub async fn list_jobs(state: &AppState) -> Vec<Arc<Job>> {
    state.jobs.list_jobs().await
}

pub async fn get_job(state: &AppState, id: &str) -> Result<Arc<Job>> {
    let id = Uuid::parse_str(id).map_err(|_| AppError::NotFound(format!("Job '{}' does not exist.", id)))?;
    state.jobs.get_job(id).await
}

/// Look up a job and wait until it is finished.
pub async fn wait_job(state: &AppState, id: &str) -> Result<Arc<Job>> {
    let job = get_job(state, id).await?;
    job.wait().await;
    Ok(job)
}
