use axum::body::Bytes;
use std::sync::Arc;

use super::validate_name;
use crate::core::jobs::{Job, JobAction};
use crate::error::{AppError, Result};
use crate::resources::SigningRequestInfo;
use crate::AppState;

pub async fn list_requests(state: &AppState) -> Result<Vec<SigningRequestInfo>> {
    Ok(state.ca.list().await?)
}

pub async fn get_request(state: &AppState, hostname: &str) -> Result<SigningRequestInfo> {
    validate_name(hostname, "hostname")?;
    Ok(state.ca.get(hostname).await?)
}

pub async fn create_request(state: &AppState, hostname: &str, body: Bytes) -> Result<Arc<Job>> {
    validate_name(hostname, "hostname")?;

    let limit = state.config.max_csr_bytes;
    if body.len() > limit {
        return Err(AppError::PayloadTooLarge {
            actual: body.len(),
            limit,
        });
    }
    if body.is_empty() {
        return Err(AppError::BadRequest("Missing data".to_string()));
    }
    let csr = String::from_utf8(body.to_vec())
        .map_err(|_| AppError::BadRequest("Signing request must be PEM text".to_string()))?;

    state
        .jobs
        .run(Job::new(hostname, JobAction::CreateSigningRequest { csr }))
        .await
}

pub async fn sign_request(state: &AppState, hostname: &str, overwrite: bool) -> Result<Arc<Job>> {
    validate_name(hostname, "hostname")?;
    state
        .jobs
        .run(Job::new(hostname, JobAction::SignRequest { overwrite }))
        .await
}

pub async fn delete_request(state: &AppState, hostname: &str) -> Result<Arc<Job>> {
    validate_name(hostname, "hostname")?;
    state
        .jobs
        .run(Job::new(hostname, JobAction::DeleteSigningRequest))
        .await
}
