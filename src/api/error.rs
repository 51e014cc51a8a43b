//! API error types with structured JSON responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::ad_token::TokenRejection;
use crate::restoration::RestorationError;
use crate::uploads::UploadError;

/// Error response body. Always `success: false`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// API-level errors with HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Token(#[from] TokenRejection),
    #[error("No image file provided")]
    NoFile,
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Not found")]
    NotFound,
    #[error("Restoration failed: {0}")]
    Restoration(#[from] RestorationError),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Token(_) => StatusCode::FORBIDDEN,
            ApiError::NoFile | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Upload(UploadError::Io(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Upload(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Restoration(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (code, error, message) = match &self {
            ApiError::Token(rejection) => (rejection.code(), self.to_string(), None),
            ApiError::NoFile => ("NO_FILE", self.to_string(), None),
            ApiError::Upload(UploadError::TooLarge { .. }) => {
                ("FILE_TOO_LARGE", self.to_string(), None)
            }
            ApiError::Upload(UploadError::Io(e)) => {
                tracing::error!("Failed to stage upload: {e}");
                ("INTERNAL", "An internal error occurred".to_string(), None)
            }
            ApiError::Upload(_) => ("UNSUPPORTED_FORMAT", self.to_string(), None),
            ApiError::BadRequest(detail) => ("BAD_REQUEST", detail.clone(), None),
            ApiError::NotFound => ("NOT_FOUND", "Not found".to_string(), None),
            ApiError::Restoration(err) => {
                tracing::error!(error = %err, "Restoration failed");
                let message = match err {
                    RestorationError::UpstreamStatus { message, .. } => message.clone(),
                    other => other.to_string(),
                };
                (
                    "UPSTREAM_FAILURE",
                    "Failed to process image".to_string(),
                    Some(message),
                )
            }
            ApiError::Internal(detail) => {
                tracing::error!(detail, "API internal error");
                ("INTERNAL", "An internal error occurred".to_string(), None)
            }
        };

        let body = ErrorBody {
            success: false,
            error,
            code,
            message,
        };
        (status, Json(body)).into_response()
    }
}
