//! API error type and its HTTP mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use planautomator_engine::EngineError;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::Engine(e) => match e {
                EngineError::MalformedPayload(_) => (StatusCode::BAD_REQUEST, "malformed_payload"),
                EngineError::UnresolvedMapping { .. } => {
                    (StatusCode::BAD_REQUEST, "unresolved_mapping")
                }
                EngineError::InvalidEndpoint(_) => (StatusCode::BAD_REQUEST, "invalid_endpoint"),
                EngineError::EndpointNotConfigured => {
                    (StatusCode::BAD_REQUEST, "endpoint_not_configured")
                }
                EngineError::InvalidMapping(_) => (StatusCode::BAD_REQUEST, "invalid_mapping"),
                EngineError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                EngineError::Storage(_) | EngineError::Serialization(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.parts();

        let message = if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        (status, Json(json!({ "error": code, "message": message }))).into_response()
    }
}
