//! Control layer between the HTTP handlers and the job manager.
//!
//! Each operation validates its input, builds a typed [`Job`](crate::core::Job)
//! and submits it. Nothing invalid ever reaches the job manager: a rejected
//! request creates no job and touches no lock.

pub mod bundles;
pub mod ca;
pub mod facts;
pub mod health;
pub mod instances;
pub mod jobs;
pub mod services;

use crate::error::{AppError, Result};

const RESOURCE_NAME_PATTERN: &str = r"^([a-zA-Z0-9_-]+\.)*[a-zA-Z0-9_-]+$";

/// Validate a resource name (instance, hostname, bundle, service, version).
pub fn validate_name(name: &str, what: &str) -> Result<()> {
    let pattern = regex::Regex::new(RESOURCE_NAME_PATTERN)
        .map_err(|e| AppError::InternalServerError(format!("Regex compilation failed: {}", e)))?;

    if !pattern.is_match(name) {
        return Err(AppError::ValidationError(format!("Invalid {}: {}", what, name)));
    }
    Ok(())
}

/// Unwrap a required request parameter.
pub fn require_param(value: Option<String>, name: &str) -> Result<String> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(AppError::BadRequest(format!("Missing required parameter: {}", name))),
    }
}
