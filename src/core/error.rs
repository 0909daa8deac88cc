//! Typed failure model shared by every layer of the gateway.
//!
//! Every raw failure is turned into a [`TypedError`] once, at the boundary
//! closest to where it happened. Upper layers pass it through untouched.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Closed set of failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Authentication,
    Authorization,
    Validation,
    Network,
    ApiClient,
    Timeout,
    Configuration,
    Resource,
    Unknown,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 9] = [
        ErrorCategory::Authentication,
        ErrorCategory::Authorization,
        ErrorCategory::Validation,
        ErrorCategory::Network,
        ErrorCategory::ApiClient,
        ErrorCategory::Timeout,
        ErrorCategory::Configuration,
        ErrorCategory::Resource,
        ErrorCategory::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Authentication => "AUTHENTICATION",
            ErrorCategory::Authorization => "AUTHORIZATION",
            ErrorCategory::Validation => "VALIDATION",
            ErrorCategory::Network => "NETWORK",
            ErrorCategory::ApiClient => "API_CLIENT",
            ErrorCategory::Timeout => "TIMEOUT",
            ErrorCategory::Configuration => "CONFIGURATION",
            ErrorCategory::Resource => "RESOURCE",
            ErrorCategory::Unknown => "UNKNOWN",
        }
    }

    /// Fixed, PII-free sentence suitable for showing to end users.
    pub fn safe_message(&self) -> &'static str {
        match self {
            ErrorCategory::Authentication => {
                "Authentication failed. Please check your credentials."
            }
            ErrorCategory::Authorization => {
                "You do not have permission to perform this operation."
            }
            ErrorCategory::Validation => "The request was invalid. Please check the input.",
            ErrorCategory::Network => {
                "A network error occurred. Please check connectivity and try again."
            }
            ErrorCategory::ApiClient => {
                "The upstream service returned an error. Please try again later."
            }
            ErrorCategory::Timeout => "The operation timed out. Please try again.",
            ErrorCategory::Configuration => {
                "The service is misconfigured. Please contact the administrator."
            }
            ErrorCategory::Resource => "The requested resource was not found.",
            ErrorCategory::Unknown => "An unexpected error occurred.",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Immutable description of a failure. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorMetadata {
    category: ErrorCategory,
    severity: ErrorSeverity,
    code: String,
    retryable: bool,
    timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<BTreeMap<String, JsonValue>>,
}

impl ErrorMetadata {
    pub fn category(&self) -> ErrorCategory {
        self.category
    }
    pub fn severity(&self) -> ErrorSeverity {
        self.severity
    }
    pub fn code(&self) -> &str {
        &self.code
    }
    pub fn retryable(&self) -> bool {
        self.retryable
    }
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }
    pub fn context(&self) -> Option<&BTreeMap<String, JsonValue>> {
        self.context.as_ref()
    }
}

type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A classified failure: message, immutable metadata and optional cause.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TypedError {
    message: String,
    metadata: ErrorMetadata,
    #[source]
    cause: Option<Cause>,
}

impl TypedError {
    pub fn builder(category: ErrorCategory, message: impl Into<String>) -> TypedErrorBuilder {
        TypedErrorBuilder::new(category, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::builder(ErrorCategory::Authentication, message).build()
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        Self::builder(ErrorCategory::Authorization, message).build()
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::builder(ErrorCategory::Validation, message).build()
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::builder(ErrorCategory::Network, message).build()
    }

    pub fn api_client(message: impl Into<String>) -> Self {
        Self::builder(ErrorCategory::ApiClient, message).build()
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::builder(ErrorCategory::Timeout, message).build()
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::builder(ErrorCategory::Configuration, message).build()
    }

    pub fn resource(message: impl Into<String>) -> Self {
        Self::builder(ErrorCategory::Resource, message).build()
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::builder(ErrorCategory::Unknown, message).build()
    }

    /// Rejection produced by an open circuit breaker.
    pub fn circuit_open(operation: &str) -> Self {
        Self::builder(
            ErrorCategory::ApiClient,
            format!("circuit breaker is open for {operation}"),
        )
        .code("CIRCUIT_OPEN")
        .retryable(false)
        .context("operation", operation)
        .build()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn metadata(&self) -> &ErrorMetadata {
        &self.metadata
    }

    pub fn category(&self) -> ErrorCategory {
        self.metadata.category
    }

    pub fn code(&self) -> &str {
        &self.metadata.code
    }

    pub fn is_retryable(&self) -> bool {
        self.metadata.retryable
    }

    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    pub fn safe_message(&self) -> &'static str {
        self.metadata.category.safe_message()
    }

    /// Text shown to callers. Production only ever sees the safe message.
    pub fn user_message(&self, production: bool) -> String {
        if production {
            return self.safe_message().to_string();
        }
        match &self.cause {
            Some(cause) => format!("{} (caused by: {})", self.message, cause),
            None => self.message.clone(),
        }
    }

    /// Emit this error at the tracing level matching its severity.
    pub fn log(&self, operation: &str) {
        let m = &self.metadata;
        let cause = self.cause.as_ref().map(|c| c.to_string());
        match m.severity {
            ErrorSeverity::Low => tracing::debug!(
                operation, category = %m.category, code = %m.code, retryable = m.retryable,
                correlation_id = ?m.correlation_id, cause = ?cause, "{}", self.message
            ),
            ErrorSeverity::Medium => tracing::info!(
                operation, category = %m.category, code = %m.code, retryable = m.retryable,
                correlation_id = ?m.correlation_id, cause = ?cause, "{}", self.message
            ),
            ErrorSeverity::High => tracing::warn!(
                operation, category = %m.category, code = %m.code, retryable = m.retryable,
                correlation_id = ?m.correlation_id, cause = ?cause, "{}", self.message
            ),
            ErrorSeverity::Critical => tracing::error!(
                operation, category = %m.category, code = %m.code, retryable = m.retryable,
                correlation_id = ?m.correlation_id, cause = ?cause, "{}", self.message
            ),
        }
    }
}

/// Per-category defaults used when a builder does not override them.
fn defaults_for(category: ErrorCategory) -> (ErrorSeverity, &'static str, bool) {
    match category {
        ErrorCategory::Authentication => (ErrorSeverity::High, "AUTHENTICATION_FAILED", false),
        ErrorCategory::Authorization => (ErrorSeverity::High, "AUTHORIZATION_DENIED", false),
        ErrorCategory::Validation => (ErrorSeverity::Low, "VALIDATION_FAILED", false),
        ErrorCategory::Network => (ErrorSeverity::Medium, "NETWORK_ERROR", true),
        ErrorCategory::ApiClient => (ErrorSeverity::Medium, "API_CLIENT_ERROR", true),
        ErrorCategory::Timeout => (ErrorSeverity::Medium, "TIMEOUT", true),
        ErrorCategory::Configuration => (ErrorSeverity::Critical, "CONFIGURATION_ERROR", false),
        ErrorCategory::Resource => (ErrorSeverity::Low, "RESOURCE_NOT_FOUND", false),
        ErrorCategory::Unknown => (ErrorSeverity::High, "UNKNOWN_ERROR", false),
    }
}

pub struct TypedErrorBuilder {
    category: ErrorCategory,
    message: String,
    severity: ErrorSeverity,
    code: String,
    retryable: bool,
    correlation_id: Option<String>,
    context: BTreeMap<String, JsonValue>,
    cause: Option<Cause>,
}

impl TypedErrorBuilder {
    fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        let (severity, code, retryable) = defaults_for(category);
        Self {
            category,
            message: message.into(),
            severity,
            code: code.to_string(),
            retryable,
            correlation_id: None,
            context: BTreeMap::new(),
            cause: None,
        }
    }

    pub fn severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn context(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn cause(mut self, cause: impl Into<Cause>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn build(self) -> TypedError {
        TypedError {
            message: self.message,
            metadata: ErrorMetadata {
                category: self.category,
                severity: self.severity,
                code: self.code,
                retryable: self.retryable,
                timestamp: Utc::now(),
                correlation_id: self.correlation_id,
                context: (!self.context.is_empty()).then_some(self.context),
            },
            cause: self.cause,
        }
    }
}

impl From<reqwest::Error> for TypedError {
    fn from(e: reqwest::Error) -> Self {
        crate::core::classify::classify_from_error(Box::new(e), None)
    }
}

impl From<std::io::Error> for TypedError {
    fn from(e: std::io::Error) -> Self {
        crate::core::classify::classify_from_error(Box::new(e), None)
    }
}

impl From<anyhow::Error> for TypedError {
    fn from(e: anyhow::Error) -> Self {
        match e.downcast::<TypedError>() {
            Ok(typed) => typed,
            Err(e) => crate::core::classify::classify_from_error(e.into(), None),
        }
    }
}
