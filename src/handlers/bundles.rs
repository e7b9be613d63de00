use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
};
use tracing::info;

use super::completed;
use crate::control::bundles;
use crate::core::jobs::JobView;
use crate::error::Result;
use crate::resources::BundleInfo;
use crate::AppState;

pub async fn list_bundles(State(state): State<AppState>) -> Result<Json<Vec<BundleInfo>>> {
    Ok(Json(bundles::list_bundles(&state).await?))
}

/// Store an uploaded archive. Responds once it is in place.
pub async fn upload_bundle(
    State(state): State<AppState>,
    Path((bundle, file)): Path<(String, String)>,
    body: Bytes,
) -> Result<(StatusCode, Json<JobView>)> {
    info!(bundle = %bundle, file = %file, bytes = body.len(), "Bundle upload received");
    let job = bundles::upload_bundle(&state, &bundle, &file, body).await?;
    completed(job, StatusCode::OK).await
}

pub async fn download_bundle(
    State(state): State<AppState>,
    Path((bundle, file)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    let archive = bundles::download_bundle(&state, &bundle, &file).await?;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], archive))
}

pub async fn delete_bundle(
    State(state): State<AppState>,
    Path((bundle, file)): Path<(String, String)>,
) -> Result<(StatusCode, Json<JobView>)> {
    let job = bundles::delete_bundle(&state, &bundle, &file).await?;
    completed(job, StatusCode::OK).await
}
