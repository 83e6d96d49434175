//! API error types and response handling.
//!
//! Every error leaves the server as an [`ErrorResponse`] JSON body. The
//! settings endpoints never fail on bad fields; they report them as
//! [`ErrorResponse`] entries built from the core error instead.

use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use beacon_core::BeaconError;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type.
#[derive(Debug, Clone)]
pub enum ApiError {
    /// 400 Bad Request - the body is not valid JSON.
    BadRequest {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 404 Not Found - no such route.
    NotFound {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },
}

impl ApiError {
    /// Malformed JSON request body.
    #[must_use]
    pub fn invalid_json(err: &serde_json::Error) -> Self {
        Self::BadRequest {
            error_code: "INVALID_JSON".to_string(),
            message: format!("Request body is not valid JSON: {err}"),
        }
    }

    /// HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
        }
    }
}

/// Standard JSON error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "PAGE_NOT_FOUND",
    "message": "No route for /api/nope"
}))]
pub struct ErrorResponse {
    /// Machine-readable error code.
    #[schema(example = "PAGE_NOT_FOUND")]
    pub error: String,

    /// Human-readable error message.
    #[schema(example = "No route for /api/nope")]
    pub message: String,
}

impl From<&BeaconError> for ErrorResponse {
    fn from(err: &BeaconError) -> Self {
        Self {
            error: err.error_code().to_string(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let (Self::BadRequest { error_code, message } | Self::NotFound { error_code, message }) =
            self;
        tracing::debug!(%status, error_code = %error_code, "Request failed");

        (
            status,
            Json(ErrorResponse {
                error: error_code,
                message,
            }),
        )
            .into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest { message, .. } => write!(f, "Bad Request: {message}"),
            Self::NotFound { message, .. } => write!(f, "Not Found: {message}"),
        }
    }
}

impl std::error::Error for ApiError {}

/// Fallback for unknown routes.
pub async fn page_not_found(uri: Uri) -> ApiError {
    ApiError::NotFound {
        error_code: "PAGE_NOT_FOUND".to_string(),
        message: format!("No route for {}", uri.path()),
    }
}
