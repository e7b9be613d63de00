use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde_json::{json, Value};

use super::parse_params;
use crate::control::health;
use crate::error::Result;
use crate::health::{CheckResult, CheckView};
use crate::AppState;

pub async fn list_checks(State(state): State<AppState>) -> Json<Vec<CheckView>> {
    Json(health::list_checks(&state).await)
}

pub async fn list_scheduled_checks(State(state): State<AppState>) -> Json<Vec<CheckView>> {
    Json(health::list_scheduled_checks(&state).await)
}

pub async fn get_check(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<CheckView>> {
    Ok(Json(health::get_check(&state, &id).await?))
}

pub async fn add_check(State(state): State<AppState>, body: Bytes) -> Result<(StatusCode, Json<CheckView>)> {
    let check = health::add_check(&state, parse_params(&body)?).await?;
    Ok((StatusCode::CREATED, Json(check)))
}

pub async fn remove_check(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>> {
    let removed = health::remove_check(&state, &id).await?;
    Ok(Json(json!({ "id": id, "removed": removed })))
}

pub async fn pause_check(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<CheckView>> {
    Ok(Json(health::pause_check(&state, &id).await?))
}

pub async fn resume_check(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<CheckView>> {
    Ok(Json(health::resume_check(&state, &id).await?))
}

pub async fn run_check(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<CheckResult>> {
    Ok(Json(health::run_check(&state, &id).await?))
}
