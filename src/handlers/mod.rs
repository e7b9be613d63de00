//! axum handlers. Each one is a thin adapter from HTTP to the control layer.

pub mod bundles;
pub mod ca;
pub mod health;
pub mod instances;
pub mod jobs;
pub mod services;
pub mod system;

use axum::{body::Bytes, http::StatusCode, response::Json};
use serde::de::DeserializeOwned;
use std::sync::Arc;

use crate::core::jobs::{Job, JobOutcome, JobView};
use crate::error::{AppError, Result};

/// Parse an optional JSON request body. An empty body yields the defaults,
/// so missing parameters are reported by the control layer as 400s.
pub(crate) fn parse_params<T>(body: &Bytes) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| AppError::BadRequest(format!("Invalid JSON body: {}", e)))
}

/// Respond with a job that was accepted and is still running.
pub(crate) fn accepted(job: &Arc<Job>) -> (StatusCode, Json<JobView>) {
    (StatusCode::ACCEPTED, Json(job.snapshot()))
}

/// Wait for `job` and respond with it, or with its error's status code.
pub(crate) async fn completed(job: Arc<Job>, status: StatusCode) -> Result<(StatusCode, Json<JobView>)> {
    match job.wait().await {
        JobOutcome::Success(_) => Ok((status, Json(job.snapshot()))),
        JobOutcome::Failure(err) => Err(AppError::Job(err)),
    }
}
