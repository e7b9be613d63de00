use axum::{
    extract::{Path, State},
    response::Json,
};

use crate::control::jobs;
use crate::core::jobs::JobView;
use crate::error::Result;
use crate::AppState;

pub async fn list_jobs(State(state): State<AppState>) -> Json<Vec<JobView>> {
    let all = jobs::list_jobs(&state).await;
    Json(all.iter().map(|job| job.snapshot()).collect())
}

pub async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<JobView>> {
    let job = jobs::get_job(&state, &id).await?;
    Ok(Json(job.snapshot()))
}

/// Block until the job is finished and return its final state.
pub async fn wait_job(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<JobView>> {
    let job = jobs::wait_job(&state, &id).await?;
    Ok(Json(job.snapshot()))
}
