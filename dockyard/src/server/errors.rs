//! Error to HTTP response mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use dockyard_api::ErrorResponse;
use tracing::error;

use crate::errors::PlatformError;

/// Handler result type
pub type ApiResult<T> = Result<T, ApiError>;

/// A [`PlatformError`] on its way out as `{error}` with a matching status
#[derive(Debug)]
pub struct ApiError(pub PlatformError);

impl From<PlatformError> for ApiError {
    fn from(err: PlatformError) -> Self {
        ApiError(err)
    }
}

/// Map an error to the HTTP status it is reported with
pub fn error_to_status(err: &PlatformError) -> StatusCode {
    match err {
        PlatformError::NotFound(_) => StatusCode::NOT_FOUND,
        PlatformError::Forbidden(_) => StatusCode::FORBIDDEN,
        PlatformError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        PlatformError::ValidationError(_) | PlatformError::InvalidTransition { .. } => {
            StatusCode::BAD_REQUEST
        }
        PlatformError::Conflict(_) => StatusCode::CONFLICT,
        PlatformError::RuntimeUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = error_to_status(&self.0);
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", self.0);
            "internal server error".to_string()
        } else {
            self.0.to_string()
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}
