//! Error types for the middleware.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use widgetry_common::{ContextError, EngineError};

use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid resource path: {0}")]
    InvalidPath(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            Error::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            Error::Engine(EngineError::TemplateNotFound(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "template_not_found")
            }
            Error::Engine(_) => (StatusCode::INTERNAL_SERVER_ERROR, "engine_error"),
            Error::Context(_) => (StatusCode::INTERNAL_SERVER_ERROR, "context_error"),
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Error::InvalidPath(_) => (StatusCode::BAD_REQUEST, "invalid_path"),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = Json(json!({
            "error": {
                "type": error_type,
                "message": self.to_string()
            }
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, Error>;
