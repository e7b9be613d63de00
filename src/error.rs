use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use serde_json::json;

use crate::core::jobs::ResourceKind;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Request body of {actual} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { actual: usize, limit: usize },

    /// Wiring mistakes made while assembling the agent. These are fatal at
    /// startup and never produced while a job runs.
    #[error("Fatal configuration error: {0}")]
    Configuration(String),

    #[error("Internal server error: {0}")]
    InternalServerError(String),

    #[error(transparent)]
    Job(#[from] JobError),
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalServerError(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InternalServerError(format!("JSON error: {}", err))
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) | AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Configuration(_) | AppError::InternalServerError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Job(err) => err.status_code(),
        }
    }

    /// The message shown to API clients. Job errors keep their own wording
    /// so operators see exactly what the action reported.
    pub fn message(&self) -> String {
        match self {
            AppError::BadRequest(msg)
            | AppError::ValidationError(msg)
            | AppError::NotFound(msg)
            | AppError::Conflict(msg)
            | AppError::Configuration(msg)
            | AppError::InternalServerError(msg) => msg.clone(),
            AppError::PayloadTooLarge { .. } => self.to_string(),
            AppError::Job(err) => err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "message": self.message(),
            "status": status.as_u16(),
            "timestamp": chrono::Utc::now().to_rfc3339()
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Failure of a single job action. Every error raised while a job runs is
/// funnelled into one of these before it is attached to the job.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("{kind} '{name}' does not exist.")]
    NotFound { kind: ResourceKind, name: String },

    #[error("{kind} '{name}' already exists.")]
    AlreadyExists { kind: ResourceKind, name: String },

    #[error("{0}")]
    Failed(String),
}

impl JobError {
    pub fn not_found(kind: ResourceKind, name: impl Into<String>) -> Self {
        JobError::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn already_exists(kind: ResourceKind, name: impl Into<String>) -> Self {
        JobError::AlreadyExists {
            kind,
            name: name.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        JobError::Failed(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            JobError::NotFound { .. } => StatusCode::NOT_FOUND,
            JobError::AlreadyExists { .. } => StatusCode::CONFLICT,
            JobError::Failed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<std::io::Error> for JobError {
    fn from(err: std::io::Error) -> Self {
        JobError::Failed(err.to_string())
    }
}

impl From<serde_json::Error> for JobError {
    fn from(err: serde_json::Error) -> Self {
        JobError::Failed(format!("JSON error: {}", err))
    }
}

impl Serialize for JobError {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("JobError", 2)?;
        state.serialize_field("code", &self.status_code().as_u16())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}
