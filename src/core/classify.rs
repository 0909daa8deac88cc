//! Turns raw failures (HTTP statuses, arbitrary errors) into [`TypedError`]s.
//!
//! Both entry points are pure: no I/O, no logging, no shared state.

use std::error::Error as StdError;
use std::io::ErrorKind;

use crate::core::error::{ErrorCategory, ErrorSeverity, TypedError, TypedErrorBuilder};

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Longest upstream body excerpt kept in error context.
const BODY_EXCERPT_LIMIT: usize = 512;

/// Classify a non-success HTTP response.
pub fn classify_from_status(
    status: u16,
    status_text: &str,
    body: Option<&str>,
    cause: Option<BoxError>,
) -> TypedError {
    status_builder(status, status_text, body, cause).build()
}

/// [`classify_from_status`] for a call tagged with a request id.
pub fn classify_from_status_correlated(
    status: u16,
    status_text: &str,
    body: Option<&str>,
    cause: Option<BoxError>,
    correlation_id: &str,
) -> TypedError {
    status_builder(status, status_text, body, cause)
        .correlation_id(correlation_id)
        .build()
}

fn status_builder(
    status: u16,
    status_text: &str,
    body: Option<&str>,
    cause: Option<BoxError>,
) -> TypedErrorBuilder {
    let message = format!("upstream responded {status} {status_text}");
    let builder = match status {
        401 => TypedError::builder(ErrorCategory::Authentication, message),
        403 => TypedError::builder(ErrorCategory::Authorization, message),
        400 | 422 => TypedError::builder(ErrorCategory::Validation, message),
        429 => TypedError::builder(ErrorCategory::ApiClient, message)
            .code("RATE_LIMITED")
            .retryable(true),
        408 | 504 => TypedError::builder(ErrorCategory::Timeout, message)
            .code("UPSTREAM_TIMEOUT")
            .retryable(true),
        404 => TypedError::builder(ErrorCategory::Resource, message)
            .code("RESOURCE_NOT_FOUND")
            .retryable(false),
        s if s >= 500 => TypedError::builder(ErrorCategory::ApiClient, message)
            .code("UPSTREAM_SERVER_ERROR")
            .severity(ErrorSeverity::High)
            .retryable(true),
        _ => TypedError::builder(ErrorCategory::ApiClient, message)
            .code("UPSTREAM_CLIENT_ERROR")
            .retryable(true),
    };

    let mut builder = builder.context("status", status);
    if let Some(body) = body.filter(|b| !b.is_empty()) {
        builder = builder.context("body", excerpt(body));
    }
    if let Some(cause) = cause {
        builder = builder.cause(cause);
    }
    builder
}

/// Classify an arbitrary error. Already-typed errors pass through unchanged.
pub fn classify_from_error(error: BoxError, context: Option<&str>) -> TypedError {
    match error_builder(error, context) {
        Ok(typed) => typed,
        Err(builder) => builder.build(),
    }
}

/// [`classify_from_error`] for a call tagged with a request id. An error that
/// is already typed keeps the metadata it was built with.
pub fn classify_from_error_correlated(
    error: BoxError,
    context: Option<&str>,
    correlation_id: &str,
) -> TypedError {
    match error_builder(error, context) {
        Ok(typed) => typed,
        Err(builder) => builder.correlation_id(correlation_id).build(),
    }
}

/// `Ok` for a pass-through typed error, otherwise the builder for a new one.
fn error_builder(error: BoxError, context: Option<&str>) -> Result<TypedError, TypedErrorBuilder> {
    let error = match error.downcast::<TypedError>() {
        Ok(typed) => return Ok(*typed),
        Err(other) => other,
    };

    let category = category_of(error.as_ref());
    let message = match context {
        Some(ctx) => format!("{ctx}: {error}"),
        None => error.to_string(),
    };
    let mut builder = TypedError::builder(category, message);
    if let Some(ctx) = context {
        builder = builder.context("context", ctx);
    }
    Err(builder.cause(error))
}

fn category_of(error: &(dyn StdError + 'static)) -> ErrorCategory {
    if let Some(e) = error.downcast_ref::<reqwest::Error>() {
        if e.is_timeout() {
            return ErrorCategory::Timeout;
        }
        if e.is_connect() || e.is_request() || e.is_body() {
            return ErrorCategory::Network;
        }
        if e.is_decode() {
            return ErrorCategory::ApiClient;
        }
    }
    if error.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
        return ErrorCategory::Timeout;
    }
    if let Some(e) = error.downcast_ref::<std::io::Error>() {
        match e.kind() {
            ErrorKind::TimedOut => return ErrorCategory::Timeout,
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe
            | ErrorKind::AddrNotAvailable => return ErrorCategory::Network,
            _ => {}
        }
    }
    category_from_text(&error.to_string())
}

fn category_from_text(text: &str) -> ErrorCategory {
    let lower = text.to_ascii_lowercase();
    if ["network", "fetch", "connection", "econnrefused", "dns"]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        ErrorCategory::Network
    } else if ["abort", "timeout", "timed out"]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        ErrorCategory::Timeout
    } else {
        ErrorCategory::Unknown
    }
}

fn excerpt(body: &str) -> String {
    match body.char_indices().nth(BODY_EXCERPT_LIMIT) {
        Some((idx, _)) => format!("{}…", &body[..idx]),
        None => body.to_string(),
    }
}
