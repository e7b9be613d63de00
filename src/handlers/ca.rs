use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;

use super::completed;
use crate::control::ca;
use crate::core::jobs::JobView;
use crate::error::Result;
use crate::resources::SigningRequestInfo;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct SignParams {
    #[serde(default)]
    pub overwrite: bool,
}

pub async fn list_requests(State(state): State<AppState>) -> Result<Json<Vec<SigningRequestInfo>>> {
    Ok(Json(ca::list_requests(&state).await?))
}

pub async fn get_request(
    State(state): State<AppState>,
    Path(hostname): Path<String>,
) -> Result<Json<SigningRequestInfo>> {
    Ok(Json(ca::get_request(&state, &hostname).await?))
}

/// Store a CSR. Responds once the request has been verified.
pub async fn create_request(
    State(state): State<AppState>,
    Path(hostname): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<JobView>)> {
    let job = ca::create_request(&state, &hostname, body).await?;
    completed(job, StatusCode::ACCEPTED).await
}

pub async fn sign_request(
    State(state): State<AppState>,
    Path(hostname): Path<String>,
    Query(params): Query<SignParams>,
) -> Result<(StatusCode, Json<JobView>)> {
    let job = ca::sign_request(&state, &hostname, params.overwrite).await?;
    completed(job, StatusCode::OK).await
}

pub async fn delete_request(
    State(state): State<AppState>,
    Path(hostname): Path<String>,
) -> Result<(StatusCode, Json<JobView>)> {
    let job = ca::delete_request(&state, &hostname).await?;
    completed(job, StatusCode::OK).await
}
