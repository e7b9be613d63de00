use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::health::{Check, CheckDefinition, CheckResult, CheckView, DEFAULT_INTERVAL};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct AddCheckParams {
    pub check: Option<CheckDefinition>,
    pub interval_secs: Option<f64>,
    pub schedule: Option<bool>,
}

pub async fn list_checks(state: &AppState) -> Vec<CheckView> {
    state.health.list_checks().await
}

pub async fn list_scheduled_checks(state: &AppState) -> Vec<CheckView> {
    state.health.list_scheduled().await
}

pub async fn get_check(state: &AppState, id: &str) -> Result<CheckView> {
    state.health.get_check(parse_check_id(id)?).await
}

/// Register a check. Checks are scheduled unless `schedule` is false.
pub async fn add_check(state: &AppState, params: AddCheckParams) -> Result<CheckView> {
    let definition = params
        .check
        .ok_or_else(|| AppError::BadRequest("Missing required parameter: check".to_string()))?;
    let interval = match params.interval_secs {
        None => DEFAULT_INTERVAL,
        Some(secs) if secs > 0.0 => Duration::try_from_secs_f64(secs)
            .map_err(|_| AppError::ValidationError(format!("Invalid interval_secs: {}", secs)))?,
        Some(secs) => return Err(AppError::ValidationError(format!("Invalid interval_secs: {}", secs))),
    };

    let check = Check::new(definition)?;
    Ok(state
        .health
        .add_check(check, interval, params.schedule.unwrap_or(true))
        .await)
}

pub async fn remove_check(state: &AppState, id: &str) -> Result<bool> {
    state.health.remove_check(parse_check_id(id)?).await
}

pub async fn pause_check(state: &AppState, id: &str) -> Result<CheckView> {
    state.health.pause_check(parse_check_id(id)?).await
}

pub async fn resume_check(state: &AppState, id: &str) -> Result<CheckView> {
    state.health.resume_check(parse_check_id(id)?).await
}

pub async fn run_check(state: &AppState, id: &str) -> Result<CheckResult> {
    state.health.run_check(parse_check_id(id)?).await
}

fn parse_check_id(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id).map_err(|_| AppError::NotFound(format!("Check '{}' does not exist.", id)))
}
