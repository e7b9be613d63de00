use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use tracing::info;

use super::{accepted, parse_params};
use crate::control::instances::{self, CreateInstanceParams, UpgradeInstanceParams};
use crate::core::jobs::JobView;
use crate::error::Result;
use crate::resources::InstanceInfo;
use crate::AppState;

pub async fn list_instances(State(state): State<AppState>) -> Result<Json<Vec<InstanceInfo>>> {
    Ok(Json(instances::list_instances(&state).await?))
}

pub async fn get_instance(State(state): State<AppState>, Path(name): Path<String>) -> Result<Json<InstanceInfo>> {
    Ok(Json(instances::get_instance(&state, &name).await?))
}

pub async fn create_instance(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<JobView>)> {
    let params: CreateInstanceParams = parse_params(&body)?;
    info!(instance = %name, "Create instance requested");

    let job = instances::create_instance(&state, &name, params).await?;
    Ok(accepted(&job))
}

pub async fn upgrade_instance(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<JobView>)> {
    let params: UpgradeInstanceParams = parse_params(&body)?;
    info!(instance = %name, "Upgrade instance requested");

    let job = instances::upgrade_instance(&state, &name, params).await?;
    Ok(accepted(&job))
}

pub async fn delete_instance(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<(StatusCode, Json<JobView>)> {
    let job = instances::delete_instance(&state, &name).await?;
    Ok(accepted(&job))
}
