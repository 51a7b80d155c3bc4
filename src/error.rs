//! Typed errors and HTTP mapping.

use crate::response::ResponseEnvelope;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
    #[error("config load: {0}")]
    Load(String),
}

/// Failure reported by a storage backend. "No rows" is never a `StoreError`.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("storage: {0}")]
    Backend(String),
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("unknown entity: {0}")]
    UnknownType(String),
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error(transparent)]
    Persistence(#[from] StoreError),
    #[error("record shape: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("{0}")]
    Hook(String),
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        EngineError::Persistence(StoreError::Db(e))
    }
}

impl EngineError {
    pub fn status(&self) -> StatusCode {
        match self {
            EngineError::UnknownType(_) | EngineError::Validation(_) | EngineError::Hook(_) => {
                StatusCode::BAD_REQUEST
            }
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::AccessDenied(_) => StatusCode::FORBIDDEN,
            EngineError::Persistence(_) | EngineError::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to hand to the caller; storage details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            EngineError::Persistence(_) | EngineError::Serialization(_) => {
                "internal server error".to_string()
            }
            EngineError::NotFound(_) => "record not found".to_string(),
            EngineError::AccessDenied(_) => "access denied".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        }
        let mut body = ResponseEnvelope::default();
        body.api_error(self.public_message());
        (status, Json(body)).into_response()
    }
}
