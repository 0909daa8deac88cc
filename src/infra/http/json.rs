use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::core::error::{ErrorCategory, TypedError};

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub message: String,
    pub category: ErrorCategory,
    pub code: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// HTTP status a client sees for a classified failure.
pub fn status_for(err: &TypedError) -> StatusCode {
    match (err.category(), err.code()) {
        (_, "CIRCUIT_OPEN") => StatusCode::SERVICE_UNAVAILABLE,
        (_, "RATE_LIMITED") => StatusCode::TOO_MANY_REQUESTS,
        (ErrorCategory::Authentication, _) => StatusCode::UNAUTHORIZED,
        (ErrorCategory::Authorization, _) => StatusCode::FORBIDDEN,
        (ErrorCategory::Validation, _) => StatusCode::BAD_REQUEST,
        (ErrorCategory::Resource, _) => StatusCode::NOT_FOUND,
        (ErrorCategory::Timeout, _) => StatusCode::GATEWAY_TIMEOUT,
        (ErrorCategory::Network | ErrorCategory::ApiClient, _) => StatusCode::BAD_GATEWAY,
        (ErrorCategory::Configuration | ErrorCategory::Unknown, _) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub fn error_body(err: &TypedError, production: bool) -> ErrorBody {
    ErrorBody {
        error: ErrorDetail {
            message: err.user_message(production),
            category: err.category(),
            code: err.code().to_string(),
            retryable: err.is_retryable(),
            correlation_id: err.metadata().correlation_id().map(str::to_string),
        },
    }
}

pub fn error_response(err: &TypedError, production: bool) -> Response {
    (status_for(err), Json(error_body(err, production))).into_response()
}
