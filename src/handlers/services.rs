use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use tracing::info;

use super::accepted;
use crate::control::services;
use crate::core::jobs::JobView;
use crate::error::Result;
use crate::resources::ServiceInfo;
use crate::AppState;

pub async fn list_services(State(state): State<AppState>) -> Result<Json<Vec<ServiceInfo>>> {
    Ok(Json(services::list_services(&state).await?))
}

pub async fn get_service(State(state): State<AppState>, Path(name): Path<String>) -> Result<Json<ServiceInfo>> {
    Ok(Json(services::get_service(&state, &name).await?))
}

pub async fn service_action(
    State(state): State<AppState>,
    Path((name, action)): Path<(String, String)>,
) -> Result<(StatusCode, Json<JobView>)> {
    info!(service = %name, action = %action, "Service action requested");
    let job = services::service_action(&state, &name, &action).await?;
    Ok(accepted(&job))
}
